/*!
# Businalyst

Client side of a business KPI dashboard, built in Rust.

## Overview

A user uploads a CSV or Excel file of transactions. The analytics backend
turns it into a KPI snapshot: totals, parallel per-transaction series and a
handful of precomputed breakdowns. This crate keeps that snapshot, persists
it across restarts and derives everything the dashboard shows from it:
bucketed time series with shares and deltas, timeframe comparisons, metric
cards, chart geometry and exports.

## Architecture

### Data Layer
- **KPI snapshot** - Lenient decoding of the backend payload (`kpi`)
- **Snapshot store** - The single current snapshot, persisted as JSON with an
  atomic write-then-rename (`store`)
- **Archives** - Gzip-compressed snapshot files for save/open (`archive`)

### Derivation Layer
- **Aggregation** - Calendar bucketing, downsampling, timeframes (`aggregate`)
- **Derived series** - Shares, deltas, segments and metric cards (`derive`)
- **Chart geometry** - Pixel coordinates for line, area, bar, donut and gauge
  charts (`geometry`)
- **Views** - Breakdown donuts, KPI gauges and laid-out charts ready to paint
  (`views`)
- **Exports** - CSV always, XLSX with the `web` feature (`export`)

### Backend Layer
- **HTTP client** - Upload and auth endpoints over reqwest (`client`)
- **Upload flow** - File validation and the upload state machine (`upload`)
- **Auth session** - Login, registration, logout, OAuth (`auth`)

### Surfaces
- `businalyst` CLI (`src/main.rs`)
- `website` dashboard server on axum (`app`, feature `web`)

## Usage

```text
businalyst upload sales.xlsx
businalyst series --metric profit --granularity week
businalyst timeframe --frame 30D --compare orders
businalyst export --output profit.csv --metric profit
```

## REST API Endpoints

- `GET /api/kpis`, `DELETE /api/kpis` - Current snapshot, clear
- `POST /api/upload`, `GET /api/upload/status` - Upload a file, poll its state
- `GET /api/metrics` - Metric cards
- `GET /api/series`, `/api/timeframe`, `/api/top-months` - Derived series
- `GET /api/export/series.csv`, `/api/export/series.xlsx`, `/api/export/top5.csv`
- `GET /api/chart.svg`, `/api/chart.png` - Rendered series
- `GET /api/chart/layout` - Series laid out as points, paths and bars
- `GET /api/breakdown/{kind}`, `/api/breakdown/column/{column}` - Donut segments
- `GET /api/gauges` - KPI progress gauges
- `/api/auth/login`, `/register`, `/logout`, `/me`, `/oauth/{provider}`
*/

pub mod aggregate;
pub mod archive;
pub mod auth;
pub mod client;
pub mod config;
pub mod demo;
pub mod derive;
pub mod error;
pub mod export;
pub mod geometry;
pub mod kpi;
pub mod store;
pub mod upload;
pub mod views;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod graph;

pub use aggregate::{Bucket, Bucketing, DataPoint, Granularity, Timeframe};
pub use config::Config;
pub use derive::{SeriesEntry, SeriesRequest};
pub use error::{Error, Result};
pub use kpi::{KpiSnapshot, Metric};
pub use store::{FilePersistence, MemoryPersistence, Persistence, SnapshotSource, SnapshotStore};
pub use upload::{SelectedFile, UploadFlow, UploadState};

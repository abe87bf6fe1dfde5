/*!
# Tablewalk

Upload a CSV or Excel file in the browser, check a preview of it, then explore
it with a drag-and-drop visualization widget.

## Overview

Each browser session moves between two screens:

```text
  Uploading --(upload ok, then proceed)--> Visualizing
  Visualizing --(go back)--> Uploading
```

On the upload screen the user picks a `.csv` or `.xlsx` file. A file that
parses becomes the session's dataset and is shown as a preview table; a file
that does not parse leaves the session untouched and shows an error. The user
then proceeds explicitly to the explorer, which renders the whole dataset in a
Graphic Walker widget. Going back drops the dataset.

An optional relay service accepts the same uploads over `POST /upload` and
answers with the file name and content type, or stores the bytes on disk.
Whether the app waits for the relay before loading a file is a configuration
choice (`advisory` or `gating`).

## Modules

- **table**: Dataset, column kinds and type inference
- **loader**: CSV and XLSX decoding into a dataset
- **preview**: Display-ready slices of a dataset
- **session**: Per-user session state and the session store
- **flow**: The two-screen flow controller
- **explorer**: Field descriptions and records for the explorer widget
- **relay**: The upload relay service and its client
- **config**: Settings from defaults, `tablewalk.toml` and the environment
- **error**: Error types shared by the modules above
- **app**: Routing, cookie sessions and page rendering (feature `web`)

## HTTP Endpoints

- `GET /` - The current screen for the caller's session
- `POST /upload` - Multipart upload, field `file`
- `POST /proceed` - Move to the explorer
- `POST /back` - Return to the upload screen
- `GET /api/explorer` - Explorer fields and records as JSON
- `GET /healthz` - Liveness probe
*/

pub mod config;
pub mod error;
pub mod explorer;
pub mod flow;
pub mod loader;
pub mod preview;
pub mod relay;
pub mod session;
pub mod table;

#[cfg(feature = "web")]
pub mod app;

pub use error::{ExplorerError, FlowError, LoadError, RelayError, TableError};
pub use flow::{FlowController, Screen, View};
pub use loader::{FileFormat, UploadedFile};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use table::{Column, ColumnKind, Dataset, Value};

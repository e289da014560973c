//! Supervision of a line-delimited JSON OCR worker process.
//!
//! The worker (PaddleOCR-json, RapidOCR-json and compatible builds) reads one
//! JSON request per line on stdin and answers with one JSON line on stdout.
//! [`OcrSupervisor`] starts it, waits for its ready marker, serializes
//! requests from any number of tasks, restarts it periodically, and shuts it
//! down cleanly.
//!
//! ```no_run
//! # async fn demo() -> ocr_worker::Result<()> {
//! use ocr_worker::{OcrSupervisor, WorkerArgs};
//!
//! let ocr = OcrSupervisor::new("/opt/PaddleOCR-json/PaddleOCR-json", WorkerArgs::default()).await?;
//! let result = ocr.ocr_file_and_parse("/tmp/receipt.png").await?;
//! println!("{}", result.text());
//! ocr.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod error;
pub mod gate;
mod process;
pub mod protocol;
pub mod result;
mod scheduler;
pub mod supervisor;

pub use args::WorkerArgs;
pub use error::{OcrError, Result};
pub use protocol::ImageInput;
pub use result::{parse_result, OcrResult, Status, TextRegion, CODE_NO_TEXT, CODE_SUCCESS};
pub use supervisor::{ocr_file_once, ocr_file_once_and_parse, OcrSupervisor, SupervisorConfig};

use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use super::{scan_auto_with, scan_format, CancellationToken, FileFormat, ScanOptions};
use crate::error::ScanError;
use crate::io::ByteSource;
use crate::region::RegionList;

/// Regions collected by a worker scan and how the scan ended.
///
/// Regions emitted before a failure or cancellation are kept.
#[derive(Debug)]
pub struct ScanOutcome {
    pub regions: RegionList,
    pub result: Result<FileFormat, ScanError>,
}

/// Handle to a scan running on its own thread.
pub struct ScanHandle {
    cancel: CancellationToken,
    thread: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    /// Ask the scan to stop at its next source access.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the scan to end.
    pub fn join(self) -> Result<ScanOutcome, ScanError> {
        self.thread
            .join()
            .map_err(|_| ScanError::Io("scan worker panicked".to_string()))
    }
}

/// Start a scan of `source` on a dedicated thread.
///
/// With `format` unset the format is detected from the leading bytes.
pub fn spawn_scan(
    mut source: Box<dyn ByteSource + Send>,
    format: Option<FileFormat>,
    options: ScanOptions,
) -> Result<ScanHandle, ScanError> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let thread = thread::Builder::new()
        .name("regionscan-worker".to_string())
        .spawn(move || {
            let mut regions = RegionList::new();
            let identifier = source.identifier().to_string();
            debug!(source = %identifier, ?format, "Scan started");

            let result = match format {
                Some(format) => {
                    scan_format(format, source.as_mut(), &mut regions, &token, &options)
                        .map(|()| format)
                }
                None => scan_auto_with(source.as_mut(), &mut regions, &token, &options),
            };

            match &result {
                Ok(format) => info!(
                    source = %identifier,
                    format = format.name(),
                    regions = regions.len(),
                    "Scan complete"
                ),
                Err(err) => debug!(
                    source = %identifier,
                    error = %err,
                    regions = regions.len(),
                    "Scan ended early"
                ),
            }

            ScanOutcome { regions, result }
        })
        .map_err(|e| ScanError::Io(format!("failed to spawn scan worker: {}", e)))?;

    Ok(ScanHandle { cancel, thread })
}

//! Progress rendering.
//!
//! Consumes a session's [`TransferEvent`] stream and drives an
//! `indicatif` bar on stderr. Also the place the final file name is
//! learned: the `started` event carries the peer's metadata, which the
//! receive path needs after the session ends.

use dropgate_core::transfer::{FileMeta, TransferEvent};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Drain `events` until the session ends; returns the session's
/// metadata, if the handshake got that far.
pub fn spawn(mut events: UnboundedReceiver<TransferEvent>, quiet: bool) -> JoinHandle<Option<FileMeta>> {
    tokio::spawn(async move {
        let mut meta_seen: Option<FileMeta> = None;
        let mut bar: Option<ProgressBar> = None;

        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::Started { meta, .. } => {
                    if !quiet {
                        let pb = ProgressBar::new(meta.size);
                        pb.set_style(
                            ProgressStyle::with_template(
                                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
                            )
                            .expect("static template")
                            .progress_chars("=> "),
                        );
                        pb.set_message(meta.name.clone());
                        bar = Some(pb);
                    }
                    meta_seen = Some(meta);
                }
                TransferEvent::Progress {
                    bytes_transferred, ..
                } => {
                    if let Some(pb) = &bar {
                        pb.set_position(bytes_transferred);
                    }
                }
                TransferEvent::Completed { .. } => {
                    if let Some(pb) = &bar {
                        pb.finish();
                    }
                }
                TransferEvent::Failed { error, .. } => {
                    if let Some(pb) = &bar {
                        pb.abandon_with_message(format!("failed: {error}"));
                    }
                }
                TransferEvent::Cancelled { .. } => {
                    if let Some(pb) = &bar {
                        pb.abandon_with_message("cancelled");
                    }
                }
            }
        }
        meta_seen
    })
}

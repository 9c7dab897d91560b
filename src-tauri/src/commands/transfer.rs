use std::path::Path;

use tauri::Emitter;

use dropgate_core::fs::{FileSink, FileSource};
use dropgate_core::net::WsChannel;
use dropgate_core::transfer::{new_session_id, FileMeta, Receiver, Sender};

use crate::state::AppState;

/// Event channel the webview subscribes to for transfer progress.
const TRANSFER_EVENT: &str = "dropgate://transfer";

/// Start sending `path` to the peer at `url` (e.g. `ws://host:port`).
///
/// Returns the session id. Progress, completion, and failure arrive on
/// the `dropgate://transfer` event channel.
#[tauri::command]
pub async fn send_file(
    app: tauri::AppHandle,
    state: tauri::State<'_, AppState>,
    path: String,
    url: String,
) -> Result<String, String> {
    let source = FileSource::open(&path).await.map_err(|e| e.to_string())?;
    let name = Path::new(&path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| format!("{path} has no file name"))?;
    let meta = FileMeta::binary(name, source.len());

    let channel = WsChannel::connect(&url).await.map_err(|e| e.to_string())?;
    let session_id = new_session_id();
    let mut sender = Sender::new(channel, source, meta, session_id.clone());

    state
        .transfers
        .write()
        .await
        .insert(session_id.clone(), sender.cancel_handle());
    forward_events(app, sender.subscribe());

    let transfers = state.transfers.clone();
    let registry_id = session_id.clone();
    tauri::async_runtime::spawn(async move {
        if let Err(err) = sender.run().await {
            tracing::warn!(session = %registry_id, error = %err, "send failed");
        }
        transfers.write().await.remove(&registry_id);
    });

    Ok(session_id)
}

/// Start receiving into `dest_path` from the peer at `url`.
///
/// Returns a registry id usable with `cancel_transfer`.
#[tauri::command]
pub async fn receive_file(
    app: tauri::AppHandle,
    state: tauri::State<'_, AppState>,
    url: String,
    dest_path: String,
) -> Result<String, String> {
    let sink = FileSink::create(&dest_path).await.map_err(|e| e.to_string())?;
    let channel = WsChannel::connect(&url).await.map_err(|e| e.to_string())?;
    let mut receiver = Receiver::new(channel, sink);

    let registry_id = new_session_id();
    state
        .transfers
        .write()
        .await
        .insert(registry_id.clone(), receiver.cancel_handle());
    forward_events(app, receiver.subscribe());

    let transfers = state.transfers.clone();
    let id = registry_id.clone();
    tauri::async_runtime::spawn(async move {
        if let Err(err) = receiver.run().await {
            tracing::warn!(session = %id, error = %err, "receive failed");
        }
        transfers.write().await.remove(&id);
    });

    Ok(registry_id)
}

/// Cancel a running transfer.
#[tauri::command]
pub async fn cancel_transfer(
    state: tauri::State<'_, AppState>,
    id: String,
    reason: Option<String>,
) -> Result<bool, String> {
    match state.transfers.read().await.get(&id) {
        Some(handle) => {
            handle.cancel(reason);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Registry ids of transfers still running.
#[tauri::command]
pub async fn active_transfers(state: tauri::State<'_, AppState>) -> Result<Vec<String>, String> {
    Ok(state.transfers.read().await.keys().cloned().collect())
}

/// Pump a session's events into the webview.
fn forward_events(
    app: tauri::AppHandle,
    mut events: tokio::sync::mpsc::UnboundedReceiver<dropgate_core::transfer::TransferEvent>,
) {
    tauri::async_runtime::spawn(async move {
        while let Some(event) = events.recv().await {
            let _ = app.emit(TRANSFER_EVENT, &event);
        }
    });
}

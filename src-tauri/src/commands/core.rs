/// Get the core library version.
#[tauri::command]
pub fn version() -> String {
    dropgate_core::version().to_string()
}

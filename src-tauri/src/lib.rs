mod commands;
mod state;

use state::AppState;

pub fn run() {
    // Set up tracing for native desktop
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dropgate_core=debug".into()),
        )
        .init();

    tracing::info!("Starting Dropgate Desktop v{}", dropgate_core::version());

    tauri::Builder::default()
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_process::init())
        .manage(AppState::new())
        .invoke_handler(tauri::generate_handler![
            // Core
            commands::core::version,

            // Transfers
            commands::transfer::send_file,
            commands::transfer::receive_file,
            commands::transfer::cancel_transfer,
            commands::transfer::active_transfers,
        ])
        .run(tauri::generate_context!())
        .expect("error while running Dropgate Desktop");
}

// Module declarations
pub mod models;
pub mod core;
pub mod utils;

#[cfg(feature = "desktop")]
mod commands;

pub use crate::core::coordinator::Coordinator;
pub use crate::models::{
    ArchiveInfo, CoordinatorOptions, JobOutcome, JobState, PerformanceProfile, UnpickError,
    VersionInfo, WordListInfo,
};
pub use crate::utils::events::{EngineEvent, EventStream};

#[cfg(feature = "desktop")]
use commands::archive::{
    cancel_archive, cancel_extraction, cancel_password_input, get_log_messages,
    get_performance_profiles, get_state, get_version_info, handle_manual_password,
    select_archive, select_output_dir, start_extraction, upload_password_list,
};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("unpick=info")))
        .init();

    let (coordinator, events) = Coordinator::new(CoordinatorOptions::default());

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_fs::init())
        .manage(coordinator)
        .setup(move |app| {
            utils::progress::ProgressEmitter::new(app.handle().clone()).spawn(events)?;
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            select_archive,
            cancel_archive,
            upload_password_list,
            select_output_dir,
            start_extraction,
            handle_manual_password,
            cancel_password_input,
            cancel_extraction,
            get_version_info,
            get_log_messages,
            get_state,
            get_performance_profiles,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

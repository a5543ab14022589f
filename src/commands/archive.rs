use std::path::PathBuf;
use tauri::{AppHandle, State};
use tauri_plugin_dialog::DialogExt;
use crate::core::archive::ArchiveRegistry;
use crate::core::coordinator::Coordinator;
use crate::models::{ArchiveInfo, JobState, PerformanceProfile, VersionInfo, WordListInfo};

enum Pick {
    File(&'static str, Vec<&'static str>),
    Folder,
}

/// Show a native picker off the async runtime; `None` when the user dismissed it
async fn pick(app: AppHandle, pick: Pick) -> Option<PathBuf> {
    let picked = tauri::async_runtime::spawn_blocking(move || {
        let dialog = app.dialog().file();
        match pick {
            Pick::File(name, extensions) => dialog.add_filter(name, &extensions).blocking_pick_file(),
            Pick::Folder => dialog.blocking_pick_folder(),
        }
    })
    .await
    .ok()
    .flatten()?;

    picked.into_path().ok()
}

/// 选择压缩包
#[tauri::command]
pub async fn select_archive(
    app: AppHandle,
    coordinator: State<'_, Coordinator>,
) -> Result<Option<ArchiveInfo>, String> {
    let filter = Pick::File("Archives", ArchiveRegistry::supported_extensions());
    let path = match pick(app, filter).await {
        Some(path) => path,
        None => return Ok(None),
    };
    Ok(Some(coordinator.select_archive(&path)?))
}

#[tauri::command]
pub async fn cancel_archive(coordinator: State<'_, Coordinator>) -> Result<(), String> {
    Ok(coordinator.cancel_archive()?)
}

/// 导入密码本
#[tauri::command]
pub async fn upload_password_list(
    app: AppHandle,
    coordinator: State<'_, Coordinator>,
) -> Result<Option<WordListInfo>, String> {
    let path = match pick(app, Pick::File("Password list", vec!["txt"])).await {
        Some(path) => path,
        None => return Ok(None),
    };
    Ok(Some(coordinator.upload_password_list(&path)?))
}

#[tauri::command]
pub async fn select_output_dir(
    app: AppHandle,
    coordinator: State<'_, Coordinator>,
) -> Result<Option<PathBuf>, String> {
    let path = match pick(app, Pick::Folder).await {
        Some(path) => path,
        None => return Ok(None),
    };
    coordinator.select_output_dir(&path)?;
    Ok(Some(path))
}

/// 开始解压；进度通过 logUpdate / needPassword / stateChanged 事件推送
#[tauri::command]
pub async fn start_extraction(
    coordinator: State<'_, Coordinator>,
    performance_mode: String,
) -> Result<(), String> {
    Ok(coordinator.start_extraction(&performance_mode)?)
}

#[tauri::command]
pub async fn handle_manual_password(
    coordinator: State<'_, Coordinator>,
    password: String,
) -> Result<(), String> {
    Ok(coordinator.submit_manual_password(&password)?)
}

#[tauri::command]
pub async fn cancel_password_input(coordinator: State<'_, Coordinator>) -> Result<(), String> {
    Ok(coordinator.cancel_password_input()?)
}

#[tauri::command]
pub async fn cancel_extraction(coordinator: State<'_, Coordinator>) -> Result<(), String> {
    Ok(coordinator.cancel_extraction()?)
}

#[tauri::command]
pub fn get_version_info(coordinator: State<'_, Coordinator>) -> VersionInfo {
    coordinator.version_info()
}

#[tauri::command]
pub fn get_log_messages(coordinator: State<'_, Coordinator>) -> Vec<String> {
    coordinator.log_history()
}

#[tauri::command]
pub fn get_state(coordinator: State<'_, Coordinator>) -> JobState {
    coordinator.state()
}

/// 可选性能模式
#[tauri::command]
pub fn get_performance_profiles() -> Vec<PerformanceProfile> {
    PerformanceProfile::builtin_names()
        .iter()
        .filter_map(|name| PerformanceProfile::from_name(name).ok())
        .collect()
}

//! FFI layer for mobile shells.
//!
//! This module provides C-compatible functions that can be called from Dart,
//! Swift or Kotlin. All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `recipebox_*` functions are allocated by Rust
//! - Caller must free them with `recipebox_string_free`
//! - Handles must be freed with `recipebox_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure
//!
//! # Threading
//!
//! Each handle owns a tokio runtime. Background sync runs on it; the blocking
//! `recipebox_sync_now` drives one cycle on it from the calling thread.

use crate::{
    HttpRemote, HttpRemoteConfig, Location, RecipeBook, RecipeDraft, RecipeQuery, RecipeRecord,
    Resolution, SyncConfig, SyncEngine, SyncHandle,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::Arc;

/// Result wrapper for FFI responses.
#[derive(Serialize)]
#[serde(untagged)]
enum FfiResult<T: Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn err(message: impl Into<String>) -> Self {
        FfiResult::Err {
            error: message.into(),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

/// Sync settings passed to `recipebox_sync_start`: the remote endpoint and
/// the engine configuration side by side in one object.
#[derive(Debug, Clone, Deserialize)]
struct SyncOptions {
    #[serde(flatten)]
    remote: HttpRemoteConfig,
    #[serde(flatten)]
    sync: SyncConfig,
}

/// An open recipe book with its runtime and optional background sync.
pub struct RecipeboxHandle {
    runtime: tokio::runtime::Runtime,
    book: Arc<RecipeBook>,
    engine: Mutex<Option<Arc<SyncEngine<HttpRemote>>>>,
    background: Mutex<Option<SyncHandle<HttpRemote>>>,
}

impl RecipeboxHandle {
    fn stop_sync(&self) {
        let running = self.background.lock().take();
        if let Some(handle) = running {
            self.runtime.block_on(handle.shutdown());
        }
    }
}

/// Convert a Rust string to a C string pointer.
/// Caller must free with `recipebox_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        // String contained null bytes - return error JSON
        Err(_) => CString::new(r#"{"error":"string contained null bytes"}"#)
            .map(CString::into_raw)
            .unwrap_or(ptr::null_mut()),
    }
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn respond<T: Serialize>(result: crate::Result<T>) -> *mut c_char {
    match result {
        Ok(value) => to_c_string(FfiResult::ok(value).to_json()),
        Err(e) => error(e.to_string()),
    }
}

fn owned(record: Arc<RecipeRecord>) -> RecipeRecord {
    record.as_ref().clone()
}

fn error(message: impl Into<String>) -> *mut c_char {
    to_c_string(FfiResult::<()>::err(message).to_json())
}

unsafe fn parse<T: serde::de::DeserializeOwned>(json: *const c_char, what: &str) -> Result<T, String> {
    let text = from_c_string(json).ok_or_else(|| format!("invalid {} string", what))?;
    serde_json::from_str(&text).map_err(|e| format!("parse error: {}", e))
}

macro_rules! handle_or_error {
    ($handle:expr) => {
        match $handle.as_ref() {
            Some(h) => h,
            None => return error("null handle"),
        }
    };
}

macro_rules! string_or_error {
    ($ptr:expr, $what:literal) => {
        match from_c_string($ptr) {
            Some(s) => s,
            None => return error(concat!("invalid ", $what)),
        }
    };
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Open (or create) a recipe book.
///
/// # Arguments
/// - `dir`: Directory for local storage, or null for an in-memory book
/// - `device_id`: Identifier used the first time the book is created
///
/// # Returns
/// Pointer to a handle, or null on failure.
///
/// # Safety
/// - `dir` must be a valid null-terminated C string or null
/// - `device_id` must be a valid null-terminated C string or null
/// - Caller must free the returned pointer with `recipebox_free`
#[no_mangle]
pub unsafe extern "C" fn recipebox_open(
    dir: *const c_char,
    device_id: *const c_char,
) -> *mut RecipeboxHandle {
    let Some(device_id) = from_c_string(device_id) else {
        return ptr::null_mut();
    };
    let book = match from_c_string(dir) {
        Some(dir) => RecipeBook::open_dir(dir, &device_id),
        None => RecipeBook::in_memory(&device_id),
    };
    let book = match book {
        Ok(book) => Arc::new(book),
        Err(e) => {
            tracing::error!(error = %e, "failed to open recipe book");
            return ptr::null_mut();
        }
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ptr::null_mut();
        }
    };

    Box::into_raw(Box::new(RecipeboxHandle {
        runtime,
        book,
        engine: Mutex::new(None),
        background: Mutex::new(None),
    }))
}

/// Stop background sync and free a handle.
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn recipebox_free(handle: *mut RecipeboxHandle) {
    if !handle.is_null() {
        let handle = Box::from_raw(handle);
        handle.stop_sync();
        drop(handle);
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `recipebox_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn recipebox_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn recipebox_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Recipe Mutations
// ============================================================================

/// Create a recipe from a draft.
///
/// # Arguments
/// - `draft_json`: `{"title": ..., "ingredients": [...], "steps": [...]}`
///
/// # Returns
/// JSON string: `{"ok": RecipeRecord}` or `{"error": "message"}`
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open` or null
/// - `draft_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `recipebox_string_free`
#[no_mangle]
pub unsafe extern "C" fn recipebox_create(
    handle: *const RecipeboxHandle,
    draft_json: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let draft: RecipeDraft = match parse(draft_json, "draft") {
        Ok(draft) => draft,
        Err(e) => return error(e),
    };
    respond(handle.book.create_recipe(draft).map(owned))
}

/// Replace the text fields of a recipe.
///
/// # Safety
/// Same as `recipebox_create`; `id` must be a valid C string or null.
#[no_mangle]
pub unsafe extern "C" fn recipebox_update(
    handle: *const RecipeboxHandle,
    id: *const c_char,
    draft_json: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    let draft: RecipeDraft = match parse(draft_json, "draft") {
        Ok(draft) => draft,
        Err(e) => return error(e),
    };
    respond(handle.book.update_recipe(&id, draft).map(owned))
}

/// Delete a recipe.
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open` or null
/// - `id` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `recipebox_string_free`
#[no_mangle]
pub unsafe extern "C" fn recipebox_delete(
    handle: *const RecipeboxHandle,
    id: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    respond(handle.book.delete_recipe(&id))
}

/// Set or clear (`"null"`) the location of a recipe.
///
/// # Safety
/// Same as `recipebox_update`.
#[no_mangle]
pub unsafe extern "C" fn recipebox_tag_location(
    handle: *const RecipeboxHandle,
    id: *const c_char,
    location_json: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    let location: Option<Location> = match parse(location_json, "location") {
        Ok(location) => location,
        Err(e) => return error(e),
    };
    respond(handle.book.tag_location(&id, location).map(owned))
}

/// Attach captured image bytes as a recipe's photo.
///
/// # Safety
/// - `handle`, `id` and `content_type` as for `recipebox_update`
/// - `bytes` must point to `len` readable bytes, or be null with `len == 0`
#[no_mangle]
pub unsafe extern "C" fn recipebox_attach_photo(
    handle: *const RecipeboxHandle,
    id: *const c_char,
    bytes: *const u8,
    len: usize,
    content_type: *const c_char,
    captured_at: u64,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    let content_type = string_or_error!(content_type, "content type");
    let bytes: &[u8] = if bytes.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(bytes, len)
    };
    respond(
        handle
            .book
            .attach_photo(&id, bytes, &content_type, captured_at)
            .map(owned),
    )
}

/// Remove a recipe's photo.
///
/// # Safety
/// Same as `recipebox_delete`.
#[no_mangle]
pub unsafe extern "C" fn recipebox_detach_photo(
    handle: *const RecipeboxHandle,
    id: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    respond(handle.book.detach_photo(&id).map(owned))
}

/// Close a conflict.
///
/// # Arguments
/// - `resolution_json`: `{"choice": "keepLocal"}`, `{"choice": "useRemote"}`
///   or `{"choice": "replace", "draft": {...}}`
///
/// # Returns
/// JSON string: `{"ok": RecipeRecord | null}` or `{"error": "message"}`
///
/// # Safety
/// Same as `recipebox_update`.
#[no_mangle]
pub unsafe extern "C" fn recipebox_resolve_conflict(
    handle: *const RecipeboxHandle,
    id: *const c_char,
    resolution_json: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    let resolution: Resolution = match parse(resolution_json, "resolution") {
        Ok(resolution) => resolution,
        Err(e) => return error(e),
    };
    respond(
        handle
            .book
            .resolve_conflict(&id, resolution)
            .map(|record| record.map(owned)),
    )
}

// ============================================================================
// Reads
// ============================================================================

/// Get a recipe by id.
///
/// # Returns
/// JSON string: `{"ok": RecipeRecord}` or `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// Same as `recipebox_delete`.
#[no_mangle]
pub unsafe extern "C" fn recipebox_get(
    handle: *const RecipeboxHandle,
    id: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    match handle.book.get(&id) {
        Ok(record) => respond(Ok(Some(owned(record)))),
        Err(crate::Error::NotFound(_)) => respond(Ok(None::<RecipeRecord>)),
        Err(e) => error(e.to_string()),
    }
}

/// List-screen rows matching a query.
///
/// # Arguments
/// - `query_json`: RecipeQuery JSON, or null for every recipe by title
///
/// # Returns
/// JSON string: `{"ok": [RecipeSummary]}` or `{"error": "message"}`
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open` or null
/// - `query_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `recipebox_string_free`
#[no_mangle]
pub unsafe extern "C" fn recipebox_query(
    handle: *const RecipeboxHandle,
    query_json: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let query = if query_json.is_null() {
        RecipeQuery::new()
    } else {
        match parse(query_json, "query") {
            Ok(query) => query,
            Err(e) => return error(e),
        }
    };
    respond(Ok(handle.book.query(&query)))
}

/// Toggle selection of a recipe.
///
/// # Returns
/// JSON string: `{"ok": <selected after toggle>}` or `{"error": "message"}`
///
/// # Safety
/// Same as `recipebox_delete`.
#[no_mangle]
pub unsafe extern "C" fn recipebox_toggle_selection(
    handle: *const RecipeboxHandle,
    id: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let id = string_or_error!(id, "recipe id");
    respond(Ok(handle.book.toggle_selection(&id)))
}

/// Ids of selected recipes.
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open` or null
/// - Caller must free the returned string with `recipebox_string_free`
#[no_mangle]
pub unsafe extern "C" fn recipebox_selected(handle: *const RecipeboxHandle) -> *mut c_char {
    let handle = handle_or_error!(handle);
    respond(Ok(handle.book.selected()))
}

/// Open conflicts.
///
/// # Safety
/// Same as `recipebox_selected`.
#[no_mangle]
pub unsafe extern "C" fn recipebox_conflicts(handle: *const RecipeboxHandle) -> *mut c_char {
    let handle = handle_or_error!(handle);
    respond(Ok(handle.book.conflicts()))
}

/// Counts and identity of the book.
///
/// # Safety
/// Same as `recipebox_selected`.
#[no_mangle]
pub unsafe extern "C" fn recipebox_summary(handle: *const RecipeboxHandle) -> *mut c_char {
    let handle = handle_or_error!(handle);
    respond(Ok(handle.book.summary()))
}

/// Number of change entries waiting for delivery.
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open` or null
#[no_mangle]
pub unsafe extern "C" fn recipebox_pending_count(handle: *const RecipeboxHandle) -> usize {
    match handle.as_ref() {
        Some(h) => h.book.pending_changes(None).len(),
        None => 0,
    }
}

// ============================================================================
// Sync
// ============================================================================

/// Configure the remote and start background sync. Replaces any running
/// background sync.
///
/// # Arguments
/// - `options_json`: `{"apiUrl": ..., "token": ..., "timeoutMs": ...}` plus any
///   [`SyncConfig`] field, e.g. `"intervalMs": null` to sync only on edits
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open` or null
/// - `options_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `recipebox_string_free`
#[no_mangle]
pub unsafe extern "C" fn recipebox_sync_start(
    handle: *const RecipeboxHandle,
    options_json: *const c_char,
) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let options: SyncOptions = match parse(options_json, "sync options") {
        Ok(options) => options,
        Err(e) => return error(e),
    };
    let remote = match HttpRemote::new(options.remote.clone()) {
        Ok(remote) => Arc::new(remote),
        Err(e) => return error(e.to_string()),
    };

    handle.stop_sync();
    let engine = Arc::new(SyncEngine::new(
        handle.book.clone(),
        remote,
        options.sync,
    ));
    let background = {
        let _entered = handle.runtime.enter();
        engine.clone().spawn()
    };
    background.trigger();
    *handle.engine.lock() = Some(engine);
    *handle.background.lock() = Some(background);
    respond(Ok(()))
}

/// Run one sync cycle now and wait for it.
///
/// # Returns
/// JSON string: `{"ok": SyncReport}` or `{"error": "message"}`
///
/// # Safety
/// Same as `recipebox_selected`. Must not be called from a runtime thread.
#[no_mangle]
pub unsafe extern "C" fn recipebox_sync_now(handle: *const RecipeboxHandle) -> *mut c_char {
    let handle = handle_or_error!(handle);
    let Some(engine) = handle.engine.lock().clone() else {
        return error("sync is not configured");
    };
    respond(handle.runtime.block_on(engine.sync_once()))
}

/// Stop background sync, cancelling a running cycle.
///
/// # Safety
/// - `handle` must be a valid pointer from `recipebox_open` or null
#[no_mangle]
pub unsafe extern "C" fn recipebox_sync_stop(handle: *const RecipeboxHandle) {
    if let Some(handle) = handle.as_ref() {
        handle.stop_sync();
        handle.engine.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn text(ptr: *mut c_char) -> String {
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        recipebox_string_free(ptr);
        s
    }

    unsafe fn open() -> *mut RecipeboxHandle {
        let device = CString::new("phone-1").unwrap();
        let handle = recipebox_open(ptr::null(), device.as_ptr());
        assert!(!handle.is_null());
        handle
    }

    #[test]
    fn ffi_create_and_get() {
        unsafe {
            let handle = open();
            let draft = CString::new(r#"{"title": "Pasta", "ingredients": ["spaghetti"]}"#).unwrap();
            let created: serde_json::Value =
                serde_json::from_str(&text(recipebox_create(handle, draft.as_ptr()))).unwrap();
            assert_eq!(created["ok"]["title"], "Pasta");
            assert_eq!(created["ok"]["syncState"], "pending");

            let id = CString::new(created["ok"]["id"].as_str().unwrap()).unwrap();
            let got = text(recipebox_get(handle, id.as_ptr()));
            assert!(got.contains("spaghetti"));
            assert_eq!(recipebox_pending_count(handle), 1);

            let missing = CString::new("nope").unwrap();
            assert_eq!(text(recipebox_get(handle, missing.as_ptr())), r#"{"ok":null}"#);

            recipebox_free(handle);
        }
    }

    #[test]
    fn ffi_query_and_selection() {
        unsafe {
            let handle = open();
            for title in ["Soup", "Pasta"] {
                let draft = CString::new(format!(r#"{{"title": "{}"}}"#, title)).unwrap();
                text(recipebox_create(handle, draft.as_ptr()));
            }
            let rows: serde_json::Value =
                serde_json::from_str(&text(recipebox_query(handle, ptr::null()))).unwrap();
            let rows = rows["ok"].as_array().unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0]["title"], "Pasta");

            let id = CString::new(rows[0]["id"].as_str().unwrap()).unwrap();
            assert_eq!(text(recipebox_toggle_selection(handle, id.as_ptr())), r#"{"ok":true}"#);
            assert!(text(recipebox_selected(handle)).contains(id.to_str().unwrap()));

            recipebox_free(handle);
        }
    }

    #[test]
    fn ffi_sync_options_carry_remote_and_engine_settings() {
        let options: SyncOptions = serde_json::from_str(
            r#"{"apiUrl": "https://recipes.example.com", "token": "t", "intervalMs": null, "pullPageSize": 25}"#,
        )
        .unwrap();
        assert_eq!(options.remote.api_url, "https://recipes.example.com");
        assert_eq!(options.remote.timeout_ms, 30_000);
        assert!(options.sync.sync_interval.is_none());
        assert_eq!(options.sync.pull_page_size, 25);
        assert_eq!(options.sync.retry, crate::RetryPolicy::default());
    }

    #[test]
    fn ffi_version() {
        let version = recipebox_version();
        let version_str = unsafe { CStr::from_ptr(version) }.to_str().unwrap();
        assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn ffi_error_handling() {
        unsafe {
            let id = CString::new("x").unwrap();
            assert!(text(recipebox_get(ptr::null(), id.as_ptr())).contains("\"error\""));

            let handle = open();
            let invalid = CString::new("not valid json").unwrap();
            assert!(text(recipebox_create(handle, invalid.as_ptr())).contains("parse error"));

            let blank = CString::new(r#"{"title": "  "}"#).unwrap();
            assert!(text(recipebox_create(handle, blank.as_ptr())).contains("\"error\""));

            assert!(text(recipebox_sync_now(handle)).contains("not configured"));
            recipebox_free(handle);
        }
    }
}

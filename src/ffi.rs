//! C ABI surface
//!
//! Exposes the one-shot query facade to foreign callers. Every entry point
//! returns a heap-allocated NUL-terminated JSON string the caller releases
//! with `free_string`; a null pointer is never returned. The async entry
//! spawns one task on a process-wide runtime and invokes the supplied
//! callback exactly once, freeing the buffer after the callback returns.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::sync::OnceLock;

use tokio::runtime::Runtime;

use crate::client::{execute, QueryRequest};
use crate::error::DnsError;
use crate::render::{render, render_error};

/// Result callback for `dns_request_async`. The string is only valid for the
/// duration of the call; copy it out if it needs to live longer.
pub type DnsRequestCallback =
    Option<unsafe extern "C" fn(result: *mut c_char, user_data: *mut c_void)>;

fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(2)
            .thread_name("dnsprobe-ffi")
            .build()
            .expect("failed to build tokio runtime")
    })
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn arg_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().to_string()
}

unsafe fn arg_opt(ptr: *const c_char) -> Option<String> {
    let value = arg_str(ptr);
    (!value.is_empty()).then_some(value)
}

fn into_c_string(s: String) -> *mut c_char {
    // JSON output cannot contain NUL, but don't trust that blindly.
    let sanitized = s.replace('\0', "");
    match CString::new(sanitized) {
        Ok(c) => c.into_raw(),
        Err(_) => CString::new(r#"{"code":-1,"message":"internal error"}"#)
            .expect("static cstring")
            .into_raw(),
    }
}

fn run_blocking(request: QueryRequest) -> *mut c_char {
    let json = runtime().block_on(async { render(execute(&request).await) });
    into_c_string(json)
}

/// Perform one DNS query and return the JSON result.
///
/// # Safety
/// All pointers must be null or valid NUL-terminated strings. The returned
/// string must be released with `free_string`.
#[no_mangle]
pub unsafe extern "C" fn dns_request(
    server: *const c_char,
    qname: *const c_char,
    qtype: *const c_char,
    qclass: *const c_char,
    sni: *const c_char,
    client_subnet: *const c_char,
) -> *mut c_char {
    let request = QueryRequest {
        server: arg_str(server),
        qname: arg_str(qname),
        qtype: arg_str(qtype),
        qclass: arg_str(qclass),
        sni: arg_opt(sni),
        client_subnet: arg_opt(client_subnet),
        ..QueryRequest::default()
    };
    run_blocking(request)
}

/// Like `dns_request`, tunneled through the given SOCKS5 proxy.
///
/// # Safety
/// See `dns_request`.
#[no_mangle]
pub unsafe extern "C" fn dns_request_over_socks5(
    proxy: *const c_char,
    server: *const c_char,
    qname: *const c_char,
    qtype: *const c_char,
    qclass: *const c_char,
    sni: *const c_char,
    client_subnet: *const c_char,
) -> *mut c_char {
    let request = QueryRequest {
        server: arg_str(server),
        qname: arg_str(qname),
        qtype: arg_str(qtype),
        qclass: arg_str(qclass),
        socks5: arg_opt(proxy),
        sni: arg_opt(sni),
        client_subnet: arg_opt(client_subnet),
        ..QueryRequest::default()
    };
    run_blocking(request)
}

/// Perform one DNS query described by a JSON object:
/// `{"server", "qname", "qtype"?, "qclass"?, "socks5"?, "sni"?, "client_subnet"?}`.
///
/// # Safety
/// See `dns_request`.
#[no_mangle]
pub unsafe extern "C" fn dns_request_json(request: *const c_char) -> *mut c_char {
    let text = arg_str(request);
    match serde_json::from_str::<QueryRequest>(&text) {
        Ok(request) => run_blocking(request),
        Err(e) => into_c_string(render_error(&DnsError::Build(format!(
            "invalid request json: {e}"
        )))),
    }
}

struct UserData(*mut c_void);
// The pointer is handed back to the callback untouched.
unsafe impl Send for UserData {}

/// Asynchronous variant: returns immediately and invokes `callback` exactly
/// once with the JSON result. The result buffer is owned by this library and
/// freed after the callback returns.
///
/// # Safety
/// See `dns_request`; `callback` must be safe to invoke from another thread.
#[no_mangle]
pub unsafe extern "C" fn dns_request_async(
    server: *const c_char,
    qname: *const c_char,
    qtype: *const c_char,
    qclass: *const c_char,
    sni: *const c_char,
    client_subnet: *const c_char,
    proxy: *const c_char,
    callback: DnsRequestCallback,
    user_data: *mut c_void,
) {
    let request = QueryRequest {
        server: arg_str(server),
        qname: arg_str(qname),
        qtype: arg_str(qtype),
        qclass: arg_str(qclass),
        socks5: arg_opt(proxy),
        sni: arg_opt(sni),
        client_subnet: arg_opt(client_subnet),
        ..QueryRequest::default()
    };
    let user_data = UserData(user_data);
    runtime().spawn(async move {
        let user_data = user_data;
        let json = render(execute(&request).await);
        let result = into_c_string(json);
        if let Some(callback) = callback {
            // SAFETY: caller guaranteed the callback is invocable; the buffer
            // stays valid until after it returns.
            unsafe { callback(result, user_data.0) };
        }
        // SAFETY: `result` came out of CString::into_raw above.
        unsafe { drop(CString::from_raw(result)) };
    });
}

/// Release a string returned by any entry point.
///
/// # Safety
/// `s` must be null or a pointer previously returned by this library.
#[no_mangle]
pub unsafe extern "C" fn free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

//! Identity database lookups against the system passwd file

use std::ffi::{CStr, CString};

/// Looks up the login name for a numeric user id.
///
/// Returns None when the uid has no passwd entry. Callers that need a
/// display name regardless should fall back to the decimal uid.
pub fn user_name(uid: u32) -> Option<String> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; passwd_buf_size()];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: getpwuid_r only writes into the passwd struct and the
    // caller-supplied buffer, both of which live for the whole call.
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }

    // SAFETY: result is non-null, so pw_name points at a NUL-terminated
    // string inside buf.
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    name.to_str().ok().map(str::to_owned)
}

/// Looks up the numeric user id for a login name.
pub fn user_id(name: &str) -> Option<u32> {
    let cname = CString::new(name).ok()?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; passwd_buf_size()];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: same contract as user_name above.
    let rc = unsafe {
        libc::getpwnam_r(
            cname.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    Some(pwd.pw_uid)
}

/// Display name for a uid: the login name when resolvable, the decimal uid
/// otherwise.
pub fn display_name(uid: u32) -> String {
    user_name(uid).unwrap_or_else(|| uid.to_string())
}

/// The uid of the user running this process.
pub fn own_uid() -> u32 {
    // SAFETY: getuid has no failure modes or side effects.
    unsafe { libc::getuid() }
}

fn passwd_buf_size() -> usize {
    // SAFETY: sysconf is a pure query.
    match unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

//! Utility functions for file names, paths, headers and ownership

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Characters that are never allowed inside a single path component
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*', '\0'];

/// Make a file or folder name safe to use as one path component
///
/// Forbidden characters and control characters are removed. Names that would
/// escape the parent directory (`.`, `..`) or end up empty become `"_"`.
///
/// # Examples
///
/// ```
/// use hoster_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b:c?.bin"), "abc.bin");
/// assert_eq!(sanitize_filename(".."), "_");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c) && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return "_".to_string();
    }
    cleaned.to_string()
}

/// Join sanitized components onto `base`
///
/// Every component is passed through [`sanitize_filename`], so the result always
/// stays below `base`. Empty components are skipped.
pub fn safe_join(base: &Path, parts: &[&str]) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in parts {
        // package folders may be nested ("series/season 1")
        for component in part.split(['/', '\\']) {
            if component.trim().is_empty() {
                continue;
            }
            path.push(sanitize_filename(component));
        }
    }
    path
}

/// Extract the file name from a Content-Disposition header value
///
/// Handles both `filename="..."` and RFC 5987 `filename*=charset'lang'...` forms.
/// The extension is kept. Returns `None` when the header carries no usable name.
///
/// # Examples
///
/// ```
/// use hoster_dl::utils::parse_content_disposition;
///
/// let name = parse_content_disposition(r#"attachment; filename="movie.mkv""#);
/// assert_eq!(name.as_deref(), Some("movie.mkv"));
/// ```
pub fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename
            let encoded = encoded.trim_matches('"');
            let encoded = match encoded.rfind('\'') {
                Some(idx) => &encoded[idx + 1..],
                None => encoded,
            };
            if let Ok(decoded) = urlencoding::decode(encoded) {
                let name = sanitize_filename(&decoded);
                if name != "_" {
                    // the extended form wins over the plain one
                    return Some(name);
                }
            }
        } else if let Some(raw) = part.strip_prefix("filename=") {
            let name = sanitize_filename(raw.trim_matches('"'));
            if name != "_" {
                plain = Some(name);
            }
        }
    }

    plain
}

/// Parse raw `Name: value` header lines into a lower-cased multi-map
///
/// Lines without a colon (such as the status line) are ignored. Repeated headers
/// keep every value in order.
pub fn parse_headers(raw: &str) -> BTreeMap<String, Vec<String>> {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for line in raw.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if key.is_empty() || key.contains(' ') {
            continue;
        }
        headers
            .entry(key)
            .or_default()
            .push(value.trim().to_string());
    }

    headers
}

/// Move `from` to `to` without replacing an existing file
///
/// Fails with [`ErrorKind::AlreadyExists`](std::io::ErrorKind::AlreadyExists) when
/// `to` exists; `from` is left in place then.
pub async fn rename_no_clobber(from: &Path, to: &Path) -> std::io::Result<()> {
    use std::io::{Error, ErrorKind};

    match tokio::fs::hard_link(from, to).await {
        Ok(()) => tokio::fs::remove_file(from).await,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        // filesystems without hard links
        Err(_) => {
            if tokio::fs::try_exists(to).await? {
                return Err(Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} already exists", to.display()),
                ));
            }
            tokio::fs::rename(from, to).await
        }
    }
}

/// Upper bound for the scratch buffer of the `get*nam_r` lookups
#[cfg(unix)]
const MAX_LOOKUP_BUFFER: usize = 1 << 20;

/// Run a reentrant `get*nam_r` lookup, growing the buffer on `ERANGE`
///
/// `lookup` receives the buffer and returns the libc error code plus the id when an
/// entry was found.
#[cfg(unix)]
fn lookup_id(
    kind: &str,
    name: &str,
    mut lookup: impl FnMut(&mut [libc::c_char]) -> (libc::c_int, Option<u32>),
) -> std::io::Result<u32> {
    use std::io::{Error, ErrorKind};

    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    loop {
        match lookup(&mut buf) {
            (_, Some(id)) => return Ok(id),
            (libc::ERANGE, None) if buf.len() < MAX_LOOKUP_BUFFER => {
                let len = buf.len() * 2;
                buf.resize(len, 0);
            }
            (0 | libc::ENOENT | libc::ESRCH, None) => {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("unknown {} '{}'", kind, name),
                ));
            }
            (code, None) => return Err(Error::from_raw_os_error(code)),
        }
    }
}

/// Resolve a user and group name to numeric ids
#[cfg(unix)]
pub fn lookup_owner(user: &str, group: &str) -> std::io::Result<(u32, u32)> {
    use std::ffi::CString;
    use std::io::{Error, ErrorKind};

    let c_user =
        CString::new(user).map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))?;
    let c_group =
        CString::new(group).map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))?;

    let uid = lookup_id("user", user, |buf| {
        // SAFETY: all-zero is a valid `passwd` value; it is only read after libc filled it
        let mut entry: libc::passwd = unsafe { std::mem::zeroed() };
        let mut found: *mut libc::passwd = std::ptr::null_mut();
        // SAFETY: `c_user` is null-terminated, `buf` outlives the call and its length is
        // passed along; string fields of `entry` point into `buf` and are never read
        let code = unsafe {
            libc::getpwnam_r(
                c_user.as_ptr(),
                &mut entry,
                buf.as_mut_ptr(),
                buf.len(),
                &mut found,
            )
        };
        (code, (!found.is_null()).then_some(entry.pw_uid))
    })?;

    let gid = lookup_id("group", group, |buf| {
        // SAFETY: see above
        let mut entry: libc::group = unsafe { std::mem::zeroed() };
        let mut found: *mut libc::group = std::ptr::null_mut();
        // SAFETY: see above
        let code = unsafe {
            libc::getgrnam_r(
                c_group.as_ptr(),
                &mut entry,
                buf.as_mut_ptr(),
                buf.len(),
                &mut found,
            )
        };
        (code, (!found.is_null()).then_some(entry.gr_gid))
    })?;

    Ok((uid, gid))
}

/// Change owner of `path` to the named user and group
#[cfg(unix)]
pub fn change_owner(path: &Path, user: &str, group: &str) -> std::io::Result<()> {
    let (uid, gid) = lookup_owner(user, group)?;
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

/// Change owner of `path` (unsupported on this platform)
#[cfg(not(unix))]
pub fn change_owner(_path: &Path, _user: &str, _group: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "Changing ownership is not supported on this platform",
    ))
}

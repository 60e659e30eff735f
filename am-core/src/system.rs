//! Host identity helpers

use crate::error::{AdbmendError, Result};

/// Hostname of the running host, as the directory store records it
pub fn hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: gethostname writes at most buf.len() bytes and NUL-terminates
    // on success; the buffer outlives the call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(AdbmendError::Io(std::io::Error::last_os_error()));
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    if name.is_empty() {
        return Err(AdbmendError::ConfigurationMissing("hostname".to_string()));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_nonempty() {
        let name = hostname().unwrap();
        assert!(!name.is_empty());
        assert!(!name.contains('\0'));
    }
}

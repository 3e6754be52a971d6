//! Native execution of x86-64 code
//!
//! The only module with `unsafe` code. A program image is one anonymous
//! mapping: the code buffer's full capacity (made read+execute once copied
//! in) followed by the data segment (read+write). The code reaches its data
//! RIP-relative, so this layout must match the one the emitter assumed.
//!
//! Faults inside generated code (bad pointers, division by zero) are not
//! caught; they terminate the process as they would in a C program.

use super::errors::RuntimeError;

/// Address of a symbol exported by the running process, if any.
#[cfg(unix)]
pub fn lookup_symbol(name: &str) -> Option<u64> {
    let name = std::ffi::CString::new(name).ok()?;
    // SAFETY: `name` is a valid NUL-terminated string and RTLD_DEFAULT is
    // always a valid handle for dlsym.
    let sym = unsafe {
        libc::dlerror();
        libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr())
    };
    (!sym.is_null()).then_some(sym as u64)
}

#[cfg(not(unix))]
pub fn lookup_symbol(_name: &str) -> Option<u64> {
    None
}

/// Whether this host can execute code from the x86-64 backend.
pub fn is_supported() -> bool {
    cfg!(all(target_arch = "x86_64", unix))
}

#[cfg(all(target_arch = "x86_64", unix))]
mod imp {
    use std::ffi::{c_char, c_void, CString};
    use std::io::{self, Write};

    use super::RuntimeError;

    type MainFn = extern "C" fn(i64, *const *const c_char) -> i64;

    /// Code and data mapped into executable memory.
    pub struct NativeImage {
        base: *mut c_void,
        len: usize,
        code_len: usize,
    }

    fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    impl NativeImage {
        pub fn load(code: &[u8], data: &[u8], code_capacity: usize) -> Result<Self, RuntimeError> {
            let page = page_size();
            if code_capacity % page != 0 || code.len() > code_capacity {
                return Err(RuntimeError::Mapping(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("code capacity {code_capacity} is not a multiple of the page size {page}"),
                )));
            }
            let len = (code_capacity + data.len().max(1)).next_multiple_of(page);

            // SAFETY: anonymous private mapping with no address hint.
            let base = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if base == libc::MAP_FAILED {
                return Err(RuntimeError::Mapping(io::Error::last_os_error()));
            }
            let image = NativeImage {
                base,
                len,
                code_len: code.len(),
            };

            // SAFETY: both copies stay inside the `len` bytes just mapped
            // writable, and the sources do not overlap the fresh mapping.
            unsafe {
                let bytes = base.cast::<u8>();
                std::ptr::copy_nonoverlapping(code.as_ptr(), bytes, code.len());
                std::ptr::copy_nonoverlapping(data.as_ptr(), bytes.add(code_capacity), data.len());
                if libc::mprotect(base, code_capacity, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                    return Err(RuntimeError::Mapping(io::Error::last_os_error()));
                }
            }
            tracing::debug!(len, code = code.len(), data = data.len(), "mapped native image");
            Ok(image)
        }

        /// Call the function at code offset `entry` as `main(argc, argv)`.
        pub fn call_main(&self, entry: usize, args: &[String]) -> Result<i64, RuntimeError> {
            if entry >= self.code_len {
                return Err(RuntimeError::Fault {
                    pc: entry,
                    message: "entry point outside of the code".to_string(),
                });
            }
            let owned: Vec<CString> = args
                .iter()
                .map(|a| CString::new(a.as_str()))
                .collect::<Result<_, _>>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let mut argv: Vec<*const c_char> = owned.iter().map(|a| a.as_ptr()).collect();
            argv.push(std::ptr::null());

            io::stdout().flush()?;
            // SAFETY: `entry` lies inside the executable code, which the
            // compiler emitted as a System V function taking (argc, argv).
            // `owned` and `argv` outlive the call.
            let result = unsafe {
                let main: MainFn = std::mem::transmute(self.base.cast::<u8>().add(entry));
                let result = main(args.len() as i64, argv.as_ptr());
                libc::fflush(std::ptr::null_mut());
                result
            };
            Ok(result)
        }
    }

    impl Drop for NativeImage {
        fn drop(&mut self) {
            // SAFETY: `base`/`len` describe exactly the mapping created in `load`.
            unsafe {
                libc::munmap(self.base, self.len);
            }
        }
    }
}

#[cfg(all(target_arch = "x86_64", unix))]
pub use imp::NativeImage;

/// Map `code` and `data` and run `main` natively.
#[cfg(all(target_arch = "x86_64", unix))]
pub fn run(
    code: &[u8],
    data: &[u8],
    code_capacity: usize,
    entry: usize,
    args: &[String],
) -> Result<i64, RuntimeError> {
    let image = NativeImage::load(code, data, code_capacity)?;
    image.call_main(entry, args)
}

#[cfg(not(all(target_arch = "x86_64", unix)))]
pub fn run(
    _code: &[u8],
    _data: &[u8],
    _code_capacity: usize,
    _entry: usize,
    _args: &[String],
) -> Result<i64, RuntimeError> {
    Err(RuntimeError::UnsupportedHost(format!(
        "{} on {}",
        std::env::consts::ARCH,
        std::env::consts::OS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_lookup_libc_symbol() {
        assert!(lookup_symbol("strlen").is_some());
        assert!(lookup_symbol("definitely_not_a_symbol_42").is_none());
        assert!(lookup_symbol("bad\0name").is_none());
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    #[test]
    fn test_run_hand_written_function() {
        // mov $7, %rax; ret
        let code = [0x48, 0xc7, 0xc0, 7, 0, 0, 0, 0xc3];
        assert_eq!(run(&code, &[], 4096, 0, &[]).unwrap(), 7);
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    #[test]
    fn test_unaligned_capacity_is_rejected() {
        assert!(matches!(
            run(&[0xc3], &[], 100, 0, &[]),
            Err(RuntimeError::Mapping(_))
        ));
    }
}

//! `libloading` binding for the vendored wrapper library.
//!
//! The wrapper exports a small C ABI:
//!
//! | Export | Signature |
//! |---|---|
//! | `sv_initW` | `(const wchar_t* basePath, int voice) -> SV_STATE*` |
//! | `sv_free` / `sv_stop` | `(SV_STATE*) -> void` |
//! | `sv_startSpeakW` | `(SV_STATE*, const wchar_t*) -> int` |
//! | `sv_read` | `(SV_STATE*, int* type, int* value, uint8_t* buf, int len) -> int` |
//! | `sv_getFormat` | `(SV_STATE*, int* rate, int* channels, int* bits) -> int` |
//! | `sv_set*` | `(SV_STATE*, int) -> void` |
//!
//! Every setter is bound to an [`EngineParam`] variant when the library is
//! loaded; setters the library does not export are simply absent, which is
//! how optional capabilities are detected.
//!
//! The library itself stays loaded for the lifetime of the loader: the
//! wrapper installs hooks that must outlive any single handle, and
//! repeated init/free cycles against one loaded image are supported.

use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, PoisonError};

use libloading::Library;

use super::{EngineConfig, EngineLoader, ItemKind, ReadItem, SynthEngine};
use crate::error::EngineError;
use crate::format::AudioFormat;
use crate::params::EngineParam;

#[cfg(windows)]
type WideChar = u16;
#[cfg(not(windows))]
type WideChar = u32;

type InitFn = unsafe extern "C" fn(*const WideChar, c_int) -> *mut c_void;
type HandleFn = unsafe extern "C" fn(*mut c_void);
type StartSpeakFn = unsafe extern "C" fn(*mut c_void, *const WideChar) -> c_int;
type ReadFn = unsafe extern "C" fn(*mut c_void, *mut c_int, *mut c_int, *mut u8, c_int) -> c_int;
type FormatFn = unsafe extern "C" fn(*mut c_void, *mut c_int, *mut c_int, *mut c_int) -> c_int;
type SetterFn = unsafe extern "C" fn(*mut c_void, c_int);

/// Encode text as a NUL-terminated wide string for the `*W` exports.
///
/// Interior NULs would truncate the text on the native side, so they are
/// replaced with spaces.
fn to_wide(text: &str) -> Vec<WideChar> {
    let cleaned = text.replace('\0', " ");
    #[cfg(windows)]
    let mut wide: Vec<WideChar> = cleaned.encode_utf16().collect();
    #[cfg(not(windows))]
    let mut wide: Vec<WideChar> = cleaned.chars().map(u32::from).collect();
    wide.push(0);
    wide
}

fn path_to_wide(path: &Path) -> Vec<WideChar> {
    to_wide(&path.to_string_lossy())
}

// ── Loaded library ─────────────────────────────────────────────────

/// Function pointers resolved from one loaded wrapper image.
struct WrapperLibrary {
    init: InitFn,
    free: HandleFn,
    stop: HandleFn,
    start_speak: StartSpeakFn,
    read: ReadFn,
    get_format: FormatFn,
    setters: HashMap<EngineParam, SetterFn>,
    // Must outlive every pointer above.
    _library: Library,
}

impl WrapperLibrary {
    fn open(path: &Path) -> Result<Self, EngineError> {
        tracing::info!(path = %path.display(), "Loading engine wrapper library");

        // SAFETY: loading the wrapper runs its initialisers; the library is
        // the vendored component this binding exists for.
        let library = unsafe { Library::new(path) }.map_err(|e| EngineError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let init = required::<InitFn>(&library, "sv_initW")?;
        let free = required::<HandleFn>(&library, "sv_free")?;
        let stop = required::<HandleFn>(&library, "sv_stop")?;
        let start_speak = required::<StartSpeakFn>(&library, "sv_startSpeakW")?;
        let read = required::<ReadFn>(&library, "sv_read")?;
        let get_format = required::<FormatFn>(&library, "sv_getFormat")?;

        let mut setters = HashMap::new();
        for param in EngineParam::ALL {
            // SAFETY: every setter shares the `(SV_STATE*, int) -> void` signature.
            match unsafe { library.get::<SetterFn>(param.symbol().as_bytes()) } {
                Ok(symbol) => {
                    setters.insert(param, *symbol);
                }
                Err(_) => tracing::debug!(setter = %param, "Setter not exported by wrapper"),
            }
        }

        Ok(Self {
            init,
            free,
            stop,
            start_speak,
            read,
            get_format,
            setters,
            _library: library,
        })
    }
}

fn required<T: Copy>(library: &Library, name: &'static str) -> Result<T, EngineError> {
    // SAFETY: the caller names the type matching the documented export.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|_| EngineError::MissingSymbol(name))
}

// ── Engine ─────────────────────────────────────────────────────────

/// A live handle into the wrapper library.
pub struct NativeEngine {
    library: Arc<WrapperLibrary>,
    handle: Option<NonNull<c_void>>,
}

// SAFETY: the wrapper marshals all engine work onto its own worker thread;
// the opaque handle may be used from any thread as long as calls are not
// concurrent, which `EngineHandle` guarantees with its mutex.
#[allow(unsafe_code)]
unsafe impl Send for NativeEngine {}

impl NativeEngine {
    fn live_handle(&self) -> Result<*mut c_void, EngineError> {
        self.handle
            .map(NonNull::as_ptr)
            .ok_or(EngineError::NotInitialized)
    }
}

impl SynthEngine for NativeEngine {
    fn start_speak(&mut self, text: &str) -> Result<(), EngineError> {
        let handle = self.live_handle()?;
        let wide = to_wide(text);
        // SAFETY: `handle` is live and `wide` is NUL-terminated.
        let status = unsafe { (self.library.start_speak)(handle, wide.as_ptr()) };
        if status == 0 {
            Ok(())
        } else {
            Err(EngineError::SpeakFailed { status })
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadItem, EngineError> {
        let handle = self.live_handle()?;
        let mut kind: c_int = 0;
        let mut value: c_int = 0;
        let capacity = c_int::try_from(buf.len()).unwrap_or(c_int::MAX);
        // SAFETY: out-pointers are valid locals and `buf` holds `capacity` bytes.
        let n = unsafe {
            (self.library.read)(handle, &raw mut kind, &raw mut value, buf.as_mut_ptr(), capacity)
        };
        let kind = ItemKind::from_raw(kind)?;
        let bytes_read = usize::try_from(n).unwrap_or(0).min(buf.len());
        Ok(ReadItem {
            kind,
            value,
            bytes_read,
        })
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle {
            // SAFETY: `handle` is live.
            unsafe { (self.library.stop)(handle.as_ptr()) };
        }
    }

    fn set_param(&mut self, param: EngineParam, value: i32) -> Result<(), EngineError> {
        let handle = self.live_handle()?;
        let setter = self
            .library
            .setters
            .get(&param)
            .ok_or(EngineError::Unsupported(param))?;
        // SAFETY: `handle` is live and the setter was resolved for this variant.
        unsafe { setter(handle, value) };
        tracing::debug!(setter = %param, value, "Engine parameter set");
        Ok(())
    }

    fn supports(&self, param: EngineParam) -> bool {
        self.library.setters.contains_key(&param)
    }

    fn format(&mut self) -> Option<AudioFormat> {
        let handle = self.live_handle().ok()?;
        let (mut rate, mut channels, mut bits): (c_int, c_int, c_int) = (0, 0, 0);
        // SAFETY: out-pointers are valid locals.
        let ok = unsafe {
            (self.library.get_format)(handle, &raw mut rate, &raw mut channels, &raw mut bits)
        };
        if ok == 0 {
            return None;
        }
        Some(AudioFormat {
            sample_rate: u32::try_from(rate).ok()?,
            channels: u16::try_from(channels).ok()?,
            bits_per_sample: u16::try_from(bits).ok()?,
        })
    }

    fn free(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::info!("Freeing engine handle");
            // SAFETY: `handle` is live and is never used again.
            unsafe { (self.library.free)(handle.as_ptr()) };
        }
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        self.free();
    }
}

// ── Loader ─────────────────────────────────────────────────────────

/// Loads the wrapper library once and creates handles from it.
#[derive(Default)]
pub struct NativeLoader {
    library: Mutex<Option<Arc<WrapperLibrary>>>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn library(&self, path: &Path) -> Result<Arc<WrapperLibrary>, EngineError> {
        let mut slot = self.library.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(library) = slot.as_ref() {
            return Ok(Arc::clone(library));
        }
        let library = Arc::new(WrapperLibrary::open(path)?);
        *slot = Some(Arc::clone(&library));
        Ok(library)
    }
}

impl EngineLoader for NativeLoader {
    fn load(&self, config: &EngineConfig) -> Result<Box<dyn SynthEngine>, EngineError> {
        let library = self.library(&config.wrapper_path)?;
        let base = path_to_wide(&config.engine_path);

        tracing::info!(
            engine = %config.engine_path.display(),
            voice = config.initial_voice,
            "Initializing engine"
        );
        // SAFETY: `base` is NUL-terminated and outlives the call.
        let raw = unsafe { (library.init)(base.as_ptr(), config.initial_voice) };
        let handle = NonNull::new(raw)
            .ok_or_else(|| EngineError::InitFailed("sv_initW returned NULL".to_string()))?;

        Ok(Box::new(NativeEngine {
            library,
            handle: Some(handle),
        }))
    }
}

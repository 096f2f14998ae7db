//! In-process implementation of the `minidb.h` C API.
//!
//! Every function is exported unmangled with the C ABI, so the generated
//! `raw` declarations link against it exactly as they would against the
//! real library. Handles are never freed, only marked released, so their
//! addresses stay unique for the release counters.

#![allow(non_snake_case, non_upper_case_globals, clippy::missing_safety_doc)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

const MDB_SUCCESS: c_int = 0;
const MDB_FAILURE: c_int = -1;

pub const ERR_NOT_FOUND: i32 = 1;
pub const ERR_BUFFER_TOO_SMALL: i32 = 2;
pub const ERR_READONLY: i32 = 3;
pub const ERR_INVALID: i32 = 4;

const OPEN_CREATE: u32 = 0x1;
const OPEN_READONLY: u32 = 0x2;

const ISOLATION_READ_COMMITTED: u32 = 1;

/// Value of `mdb_getClientVersion` and `mdbVersionNumber`.
pub const CLIENT_VERSION: u32 = 10_203;

static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);
static SHUTDOWN_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Release calls per handle address.
static RELEASES: Mutex<BTreeMap<usize, usize>> = parking_lot::const_mutex(BTreeMap::new());

/// Databases by path; reopening a path sees earlier writes.
static STORES: Mutex<BTreeMap<String, Store>> = parking_lot::const_mutex(BTreeMap::new());

#[no_mangle]
pub static mdbVersionNumber: u32 = CLIENT_VERSION;

#[no_mangle]
pub static mut mdbDebugFlag: c_int = 0;

type Store = BTreeMap<String, Vec<u8>>;

struct LastError {
    code: i32,
    message: String,
    recoverable: bool,
}

thread_local! {
    static LAST_ERROR: RefCell<LastError> = const {
        RefCell::new(LastError {
            code: 0,
            message: String::new(),
            recoverable: false,
        })
    };
}

struct Failure {
    code: i32,
    message: String,
    recoverable: bool,
}

fn failure(code: i32, message: impl Into<String>) -> Failure {
    Failure {
        code,
        message: message.into(),
        recoverable: false,
    }
}

/// Run `body`, recording its failure as the thread's last error.
fn status(body: impl FnOnce() -> Result<(), Failure>) -> c_int {
    match body() {
        Ok(()) => MDB_SUCCESS,
        Err(f) => {
            LAST_ERROR.with(|e| {
                *e.borrow_mut() = LastError {
                    code: f.code,
                    message: f.message,
                    recoverable: f.recoverable,
                }
            });
            MDB_FAILURE
        }
    }
}

fn record_release(addr: usize) {
    *RELEASES.lock().entry(addr).or_insert(0) += 1;
}

/// How many times the handle at `addr` has been released.
pub fn release_count(addr: usize) -> usize {
    RELEASES.lock().get(&addr).copied().unwrap_or(0)
}

pub fn init_calls() -> usize {
    INIT_CALLS.load(Ordering::SeqCst)
}

pub fn shutdown_calls() -> usize {
    SHUTDOWN_CALLS.load(Ordering::SeqCst)
}

pub struct MockDb {
    path: String,
    flags: u32,
    isolation: Mutex<u32>,
    name: Mutex<CString>,
    released: AtomicBool,
}

pub struct MockCursor {
    keys: Vec<String>,
    position: Mutex<usize>,
    released: AtomicBool,
}

unsafe fn live_db<'a>(ptr: *mut MockDb) -> Result<&'a MockDb, Failure> {
    match unsafe { ptr.as_ref() } {
        None => Err(failure(ERR_INVALID, "null database handle")),
        Some(db) if db.released.load(Ordering::SeqCst) => Err(failure(ERR_INVALID, "database handle used after release")),
        Some(db) => Ok(db),
    }
}

unsafe fn text<'a>(ptr: *const c_char, len: u32) -> Result<&'a str, Failure> {
    if ptr.is_null() {
        return Err(failure(ERR_INVALID, "null string"));
    }
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) };
    std::str::from_utf8(bytes).map_err(|_| failure(ERR_INVALID, "string is not UTF-8"))
}

fn with_store<R>(db: &MockDb, f: impl FnOnce(&mut Store) -> R) -> R {
    let mut stores = STORES.lock();
    f(stores.entry(db.path.clone()).or_default())
}

#[no_mangle]
pub extern "C" fn mdb_init() -> c_int {
    INIT_CALLS.fetch_add(1, Ordering::SeqCst);
    MDB_SUCCESS
}

#[no_mangle]
pub extern "C" fn mdb_shutdown() {
    SHUTDOWN_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[no_mangle]
pub unsafe extern "C" fn mdb_getLastError(
    code: *mut i32,
    message: *mut *const c_char,
    messageLength: *mut u32,
    isRecoverable: *mut c_int,
) {
    LAST_ERROR.with(|e| {
        let e = e.borrow();
        unsafe {
            *code = e.code;
            *message = e.message.as_ptr().cast();
            *messageLength = e.message.len() as u32;
            *isRecoverable = c_int::from(e.recoverable);
        }
    });
}

#[no_mangle]
pub extern "C" fn mdb_getClientVersion() -> u32 {
    CLIENT_VERSION
}

#[no_mangle]
pub extern "C" fn mdb_setLogLevel(_level: u32) -> c_int {
    MDB_SUCCESS
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_open(path: *const c_char, pathLength: u32, flags: u32, db: *mut *mut MockDb) -> c_int {
    status(|| {
        let path = unsafe { text(path, pathLength) }?;
        if path.is_empty() {
            return Err(failure(ERR_INVALID, "empty path"));
        }
        {
            let mut stores = STORES.lock();
            if !stores.contains_key(path) {
                if flags & OPEN_CREATE == 0 {
                    return Err(failure(ERR_NOT_FOUND, format!("no database at '{path}'")));
                }
                stores.insert(path.to_string(), Store::new());
            }
        }
        let mock = Box::new(MockDb {
            path: path.to_string(),
            flags,
            isolation: Mutex::new(ISOLATION_READ_COMMITTED),
            name: Mutex::new(CString::default()),
            released: AtomicBool::new(false),
        });
        unsafe { *db = Box::leak(mock) };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_close(db: *mut MockDb) -> c_int {
    status(|| {
        let mock = unsafe { ptr_ref(db) }?;
        record_release(db as usize);
        if mock.released.swap(true, Ordering::SeqCst) {
            return Err(failure(ERR_INVALID, "database released twice"));
        }
        Ok(())
    })
}

unsafe fn ptr_ref<'a, T>(ptr: *mut T) -> Result<&'a T, Failure> {
    unsafe { ptr.as_ref() }.ok_or_else(|| failure(ERR_INVALID, "null handle"))
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_put(
    db: *mut MockDb,
    key: *const c_char,
    keyLength: u32,
    value: *const c_void,
    valueSize: usize,
) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        if db.flags & OPEN_READONLY != 0 {
            return Err(failure(ERR_READONLY, "database is read-only"));
        }
        let key = unsafe { text(key, keyLength) }?;
        let value = if valueSize == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(value.cast::<u8>(), valueSize) }.to_vec()
        };
        with_store(db, |store| store.insert(key.to_string(), value));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_get(
    db: *mut MockDb,
    key: *const c_char,
    keyLength: u32,
    buffer: *mut c_char,
    bufferLength: *mut u64,
) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        let key = unsafe { text(key, keyLength) }?;
        let value = with_store(db, |store| store.get(key).cloned())
            .ok_or_else(|| failure(ERR_NOT_FOUND, format!("key '{key}' not found")))?;
        let capacity = unsafe { *bufferLength } as usize;
        if value.len() > capacity {
            return Err(Failure {
                code: ERR_BUFFER_TOO_SMALL,
                message: format!("value needs {} bytes, buffer holds {capacity}", value.len()),
                recoverable: true,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(value.as_ptr(), buffer.cast::<u8>(), value.len());
            *bufferLength = value.len() as u64;
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_exists(db: *mut MockDb, key: *const c_char, keyLength: u32) -> c_int {
    let Ok(db) = (unsafe { live_db(db) }) else {
        return 0;
    };
    let Ok(key) = (unsafe { text(key, keyLength) }) else {
        return 0;
    };
    c_int::from(with_store(db, |store| store.contains_key(key)))
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_count(db: *mut MockDb, count: *mut u64) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        let n = with_store(db, |store| store.len());
        unsafe { *count = n as u64 };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_getFlags(db: *mut MockDb, flags: *mut u32) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        unsafe { *flags = db.flags };
        Ok(())
    })
}

/// Accepts any value, so callers going through `raw` can store one the
/// enumeration does not declare.
#[no_mangle]
pub unsafe extern "C" fn mdbDb_setIsolation(db: *mut MockDb, level: u32) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        *db.isolation.lock() = level;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_getIsolation(db: *mut MockDb, level: *mut u32) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        unsafe { *level = *db.isolation.lock() };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_setName(db: *mut MockDb, name: *const c_char) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        if name.is_null() {
            return Err(failure(ERR_INVALID, "null name"));
        }
        *db.name.lock() = unsafe { CStr::from_ptr(name) }.to_owned();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_getName(db: *mut MockDb, name: *mut *const c_char, nameLength: *mut u32) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        let current = db.name.lock();
        unsafe {
            *name = current.as_ptr();
            *nameLength = current.as_bytes().len() as u32;
        }
        Ok(())
    })
}

#[repr(C)]
pub struct MockStats {
    major: u32,
    minor: u32,
    keys: u64,
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_getStats(db: *mut MockDb, stats: *mut MockStats) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        let keys = with_store(db, |store| store.len() as u64);
        let stats = unsafe { stats.as_mut() }.ok_or_else(|| failure(ERR_INVALID, "null stats"))?;
        stats.major = CLIENT_VERSION / 10_000;
        stats.minor = CLIENT_VERSION / 100 % 100;
        stats.keys = keys;
        Ok(())
    })
}

type Callback = Option<unsafe extern "C" fn(*mut c_void, *const c_char, u32)>;

#[no_mangle]
pub unsafe extern "C" fn mdbDb_forEach(db: *mut MockDb, callback: Callback, context: *mut c_void) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        let callback = callback.ok_or_else(|| failure(ERR_INVALID, "null callback"))?;
        let keys: Vec<String> = with_store(db, |store| store.keys().cloned().collect());
        for key in keys {
            unsafe { callback(context, key.as_ptr().cast(), key.len() as u32) };
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbDb_openCursor(db: *mut MockDb, cursor: *mut *mut MockCursor) -> c_int {
    status(|| {
        let db = unsafe { live_db(db) }?;
        let keys = with_store(db, |store| store.keys().cloned().collect());
        let mock = Box::new(MockCursor {
            keys,
            position: Mutex::new(0),
            released: AtomicBool::new(false),
        });
        unsafe { *cursor = Box::leak(mock) };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbCursor_next(
    cursor: *mut MockCursor,
    found: *mut c_int,
    key: *mut *const c_char,
    keyLength: *mut u32,
) -> c_int {
    status(|| {
        let cursor = unsafe { ptr_ref(cursor) }?;
        if cursor.released.load(Ordering::SeqCst) {
            return Err(failure(ERR_INVALID, "cursor used after release"));
        }
        let mut position = cursor.position.lock();
        match cursor.keys.get(*position) {
            Some(next) => unsafe {
                *found = 1;
                *key = next.as_ptr().cast();
                *keyLength = next.len() as u32;
            },
            None => unsafe {
                *found = 0;
                *key = std::ptr::null();
                *keyLength = 0;
            },
        }
        *position += 1;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn mdbCursor_release(cursor: *mut MockCursor) -> c_int {
    status(|| {
        let mock = unsafe { ptr_ref(cursor) }?;
        record_release(cursor as usize);
        if mock.released.swap(true, Ordering::SeqCst) {
            return Err(failure(ERR_INVALID, "cursor released twice"));
        }
        Ok(())
    })
}

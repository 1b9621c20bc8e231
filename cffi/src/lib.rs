use std::{
    ffi::{CStr, CString},
    os::raw::c_char,
    sync::atomic::{AtomicPtr, Ordering},
};

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::{Mutex, RwLock};
use strum::FromRepr;
use vscore::{
    ContextConfig, ContextKey, Engine, InterruptHandle, ModelKey, SearchParams, Status, VsResult,
};
use vsterms::{ErrorCode, Term, TermResult, TermTable, TypeId};

/// Terms and types cross the boundary as their raw index; negative values are invalid.
pub type VsTerm = i32;
pub type VsType = i32;

pub const VS_NULL_TERM: VsTerm = -1;
pub const VS_NULL_TYPE: VsType = -1;
/// Returned instead of a status when `vsCheckContext` or `vsContextStatus` fails.
pub const VS_STATUS_ERROR: i32 = -1;

static ENGINE: Mutex<Option<Engine>> = Mutex::new(None);

pub struct VsContext {
    key: ContextKey,
    interrupt: InterruptHandle,
}

pub struct VsModel(ModelKey);
pub struct VsParamRecord(SearchParams);
pub struct VsCtxConfig(ContextConfig);

/// cbindgen:rename-all=ScreamingSnakeCase
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum VsLogLevel {
    VsLogLevelTrace = 0,
    VsLogLevelDebug = 1,
    VsLogLevelInfo = 2,
    VsLogLevelWarn = 3,
    VsLogLevelError = 4,
}

impl From<log::Level> for VsLogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => VsLogLevel::VsLogLevelTrace,
            log::Level::Debug => VsLogLevel::VsLogLevelDebug,
            log::Level::Info => VsLogLevel::VsLogLevelInfo,
            log::Level::Warn => VsLogLevel::VsLogLevelWarn,
            log::Level::Error => VsLogLevel::VsLogLevelError,
        }
    }
}

impl From<VsLogLevel> for LevelFilter {
    fn from(level: VsLogLevel) -> Self {
        match level {
            VsLogLevel::VsLogLevelTrace => LevelFilter::Trace,
            VsLogLevel::VsLogLevelDebug => LevelFilter::Debug,
            VsLogLevel::VsLogLevelInfo => LevelFilter::Info,
            VsLogLevel::VsLogLevelWarn => LevelFilter::Warn,
            VsLogLevel::VsLogLevelError => LevelFilter::Error,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct VsVersionInfo {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl From<semver::Version> for VsVersionInfo {
    fn from(v: semver::Version) -> Self {
        VsVersionInfo {
            major: v.major as u16,
            minor: v.minor as u16,
            patch: v.patch as u16,
        }
    }
}

/// cbindgen:rename-all=CamelCase
#[repr(C)]
pub struct VsErrorReport {
    pub code: i32,
    pub term1: VsTerm,
    pub type1: VsType,
    pub term2: VsTerm,
    pub type2: VsType,
    pub badval: i64,
}

/// Growable array of terms, allocated with `malloc`.
///
/// Must go through `vsInitTermVector` before its first use and `vsDeleteTermVector` after
/// its last one.
/// cbindgen:rename-all=CamelCase
#[repr(C)]
pub struct VsTermVector {
    pub capacity: u32,
    pub size: u32,
    pub data: *mut VsTerm,
}

/// cbindgen:rename-all=CamelCase
#[repr(C)]
pub struct VsLogMessage {
    pub level: VsLogLevel,
    pub message: *const c_char,
    pub target: *const c_char,
    pub file: *const c_char,
    pub line: u32,
}

#[allow(non_camel_case_types)]
pub type VsLogCallback_PFN = extern "C" fn(message: *const VsLogMessage);

#[allow(non_camel_case_types)]
pub type VsOutOfMemCallback_PFN = extern "C" fn();

// ---------------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------------

fn term(t: VsTerm) -> Term {
    Term::from_raw(t as u32)
}

fn ty(t: VsType) -> TypeId {
    TypeId::from_raw(t as u32)
}

fn c_term(t: Term) -> VsTerm {
    t.raw() as VsTerm
}

fn c_type(t: TypeId) -> VsType {
    t.raw() as VsType
}

fn c_bool(b: bool) -> i32 {
    b as i32
}

/// Run `f` on the global engine and record its failure; `sentinel` is returned on
/// failure and when the library is not initialized.
fn with_engine<T>(sentinel: T, f: impl FnOnce(&mut Engine) -> VsResult<T>) -> T {
    let mut guard = ENGINE.lock();
    let Some(engine) = guard.as_mut() else {
        log::warn!("vesta: call outside of vsInit/vsExit");
        return sentinel;
    };
    let result = f(engine);
    engine.record(result).unwrap_or(sentinel)
}

fn build_term(f: impl FnOnce(&mut TermTable) -> TermResult<Term>) -> VsTerm {
    with_engine(VS_NULL_TERM, |e| e.build(f).map(c_term))
}

fn build_type(f: impl FnOnce(&mut TermTable) -> TermResult<TypeId>) -> VsType {
    with_engine(VS_NULL_TYPE, |e| e.build(f).map(c_type))
}

fn status_code(result: VsResult<()>) -> VsResult<i32> {
    result.map(|()| 0)
}

unsafe fn raw_slice<'a, T>(ptr: *const T, n: u32) -> &'a [T] {
    if ptr.is_null() || n == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, n as usize) }
    }
}

unsafe fn term_array(ptr: *const VsTerm, n: u32) -> Vec<Term> {
    unsafe { raw_slice(ptr, n) }.iter().map(|&t| term(t)).collect()
}

unsafe fn type_array(ptr: *const VsType, n: u32) -> Vec<TypeId> {
    unsafe { raw_slice(ptr, n) }.iter().map(|&t| ty(t)).collect()
}

/// A null pointer reads as the empty string.
unsafe fn string_arg(p: *const c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(p).to_string_lossy().into_owned() }
    }
}

/// Hand a string to the caller, who releases it with `vsFreeString`.
fn c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    let mut bytes = s.into();
    bytes.retain(|&b| b != 0);
    CString::new(bytes).map(CString::into_raw).unwrap_or(std::ptr::null_mut())
}

fn fill_vector(v: &mut VsTermVector, terms: &[Term]) {
    let n = terms.len() as u32;
    if n > v.capacity {
        let bytes = terms.len() * std::mem::size_of::<VsTerm>();
        let data = unsafe { libc::realloc(v.data as *mut libc::c_void, bytes) } as *mut VsTerm;
        if data.is_null() {
            vsterms::oom::out_of_memory();
        }
        v.data = data;
        v.capacity = n;
    }
    for (i, &t) in terms.iter().enumerate() {
        unsafe { *v.data.add(i) = c_term(t) };
    }
    v.size = n;
}

// ---------------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------------

/// Retrieves the version of the Vesta library.
///
/// # Safety
/// - `pVersionInfo` must be a valid pointer to a `VsVersionInfo`, or null.
///cbindgen:rename-all=CamelCase
#[no_mangle]
pub extern "C" fn vsGetVersion(p_version_info: *mut VsVersionInfo) {
    if p_version_info.is_null() {
        return;
    }
    let version: semver::Version = vscore::version().into();
    unsafe {
        *p_version_info = version.into();
    }
}

/// Initializes the global engine. Every other call must happen between `vsInit` and
/// `vsExit`.
#[no_mangle]
pub extern "C" fn vsInit() {
    let mut guard = ENGINE.lock();
    if guard.is_none() {
        *guard = Some(Engine::new());
        log::info!("vesta: initialized");
    }
}

/// Releases the global engine and everything it owns. Context and model handles must
/// be freed first.
#[no_mangle]
pub extern "C" fn vsExit() {
    *ENGINE.lock() = None;
}

/// Deletes every term, type, context and model.
#[no_mangle]
pub extern "C" fn vsReset() {
    if let Some(engine) = ENGINE.lock().as_mut() {
        engine.reset();
    }
}

// ---------------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vsErrorCode() -> i32 {
    ENGINE
        .lock()
        .as_ref()
        .map_or(ErrorCode::NoError as i32, |e| e.error().code as i32)
}

/// Copies the error record into `pReport`.
///
/// # Safety
/// - `pReport` must be a valid pointer to a `VsErrorReport`, or null.
///cbindgen:rename-all=CamelCase
#[no_mangle]
pub extern "C" fn vsErrorReport(p_report: *mut VsErrorReport) {
    if p_report.is_null() {
        return;
    }
    let report = ENGINE.lock().as_ref().map(|e| *e.error()).unwrap_or_default();
    unsafe {
        *p_report = VsErrorReport {
            code: report.code as i32,
            term1: report.term1.map_or(VS_NULL_TERM, c_term),
            type1: report.type1.map_or(VS_NULL_TYPE, c_type),
            term2: report.term2.map_or(VS_NULL_TERM, c_term),
            type2: report.type2.map_or(VS_NULL_TYPE, c_type),
            badval: report.badval,
        };
    }
}

#[no_mangle]
pub extern "C" fn vsClearError() {
    if let Some(engine) = ENGINE.lock().as_mut() {
        engine.clear_error();
    }
}

/// Message of the last failure. The result must be released with `vsFreeString`.
#[no_mangle]
pub extern "C" fn vsErrorString() -> *mut c_char {
    let message = ENGINE
        .lock()
        .as_ref()
        .map(|e| e.error_message().to_owned())
        .unwrap_or_default();
    c_string(message)
}

/// Releases a string returned by this library.
///
/// # Safety
/// - `s` must come from this library and must not be used afterwards.
#[no_mangle]
pub extern "C" fn vsFreeString(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(s));
    }
}

static OUT_OF_MEM_CALLBACK: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

fn call_out_of_mem_callback() {
    let raw = OUT_OF_MEM_CALLBACK.load(Ordering::SeqCst);
    if !raw.is_null() {
        // Only `VsOutOfMemCallback_PFN` values are stored.
        let callback = unsafe { std::mem::transmute::<*mut (), VsOutOfMemCallback_PFN>(raw) };
        callback();
    }
}

/// Installs the function called before the process exits on memory exhaustion. Pass
/// null to remove it. The process exits even if the callback returns.
#[no_mangle]
pub extern "C" fn vsSetOutOfMemCallback(callback: Option<VsOutOfMemCallback_PFN>) {
    match callback {
        Some(f) => {
            OUT_OF_MEM_CALLBACK.store(f as *mut (), Ordering::SeqCst);
            vsterms::oom::set_out_of_mem_callback(Some(call_out_of_mem_callback));
        }
        None => {
            OUT_OF_MEM_CALLBACK.store(std::ptr::null_mut(), Ordering::SeqCst);
            vsterms::oom::set_out_of_mem_callback(None);
        }
    }
}

// ---------------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------------

static LOG_CALLBACK: RwLock<Option<VsLogCallback_PFN>> = RwLock::new(None);
static LOG_BRIDGE: LogBridge = LogBridge;

struct LogBridge;

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && LOG_CALLBACK.read().is_some()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(callback) = *LOG_CALLBACK.read() else {
            return;
        };
        let message = CString::new(record.args().to_string()).unwrap_or_default();
        let target = CString::new(record.target()).unwrap_or_default();
        let file = CString::new(record.file().unwrap_or_default()).unwrap_or_default();
        let message = VsLogMessage {
            level: record.level().into(),
            message: message.as_ptr(),
            target: target.as_ptr(),
            file: file.as_ptr(),
            line: record.line().unwrap_or(0),
        };
        callback(&message);
    }

    fn flush(&self) {}
}

/// Routes the library's log records at `level` and above to `callback`; null stops
/// the forwarding. Records go to the host's logger instead when it installed one.
#[no_mangle]
pub extern "C" fn vsSetLogCallback(level: u32, callback: Option<VsLogCallback_PFN>) {
    let Some(level) = VsLogLevel::from_repr(level) else {
        return;
    };
    *LOG_CALLBACK.write() = callback;
    // Fails when another logger is installed; the level still applies to it.
    let _ = log::set_logger(&LOG_BRIDGE);
    log::set_max_level(level.into());
}

// ---------------------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------------------

/// # Safety
/// - `v` must be a valid pointer to a `VsTermVector`.
#[no_mangle]
pub extern "C" fn vsInitTermVector(v: *mut VsTermVector) {
    if v.is_null() {
        return;
    }
    unsafe {
        *v = VsTermVector {
            capacity: 0,
            size: 0,
            data: std::ptr::null_mut(),
        };
    }
}

/// # Safety
/// - `v` must point to an initialized `VsTermVector`.
#[no_mangle]
pub extern "C" fn vsResetTermVector(v: *mut VsTermVector) {
    if v.is_null() {
        return;
    }
    unsafe { (*v).size = 0 };
}

/// # Safety
/// - `v` must point to an initialized `VsTermVector`; its storage is released.
#[no_mangle]
pub extern "C" fn vsDeleteTermVector(v: *mut VsTermVector) {
    if v.is_null() {
        return;
    }
    unsafe {
        libc::free((*v).data as *mut libc::c_void);
    }
    vsInitTermVector(v);
}

// ---------------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vsBoolType() -> VsType {
    c_type(TypeId::BOOL)
}

#[no_mangle]
pub extern "C" fn vsBvType(size: u32) -> VsType {
    build_type(|t| t.types_mut().bv_type(size))
}

#[no_mangle]
pub extern "C" fn vsNewUninterpretedType() -> VsType {
    build_type(|t| Ok(t.types_mut().new_uninterpreted()))
}

/// # Safety
/// - `dom` must point to `n` types.
#[no_mangle]
pub extern "C" fn vsFunctionType(n: u32, dom: *const VsType, range: VsType) -> VsType {
    let domain = unsafe { type_array(dom, n) };
    build_type(|t| t.types_mut().function_type(&domain, ty(range)))
}

#[no_mangle]
pub extern "C" fn vsTypeOfTerm(t: VsTerm) -> VsType {
    build_type(|table| table.type_of(term(t)))
}

/// Width of a bitvector term, 0 on error.
#[no_mangle]
pub extern "C" fn vsTermBitsize(t: VsTerm) -> u32 {
    with_engine(0, |e| {
        e.query(|table| {
            table.check(term(t))?;
            table
                .bv_width(term(t))
                .ok_or(vsterms::TermError::BitvectorRequired(term(t)))
        })
    })
}

// ---------------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vsTrue() -> VsTerm {
    c_term(Term::TRUE)
}

#[no_mangle]
pub extern "C" fn vsFalse() -> VsTerm {
    c_term(Term::FALSE)
}

#[no_mangle]
pub extern "C" fn vsNewUninterpretedTerm(tau: VsType) -> VsTerm {
    build_term(|t| t.new_uninterpreted_term(ty(tau)))
}

#[no_mangle]
pub extern "C" fn vsNewVariable(tau: VsType) -> VsTerm {
    build_term(|t| t.new_variable(ty(tau)))
}

#[no_mangle]
pub extern "C" fn vsNot(a: VsTerm) -> VsTerm {
    build_term(|t| t.not(term(a)))
}

/// # Safety
/// - `args` must point to `n` terms.
#[no_mangle]
pub extern "C" fn vsAnd(n: u32, args: *const VsTerm) -> VsTerm {
    let args = unsafe { term_array(args, n) };
    build_term(|t| t.and(&args))
}

/// # Safety
/// - `args` must point to `n` terms.
#[no_mangle]
pub extern "C" fn vsOr(n: u32, args: *const VsTerm) -> VsTerm {
    let args = unsafe { term_array(args, n) };
    build_term(|t| t.or(&args))
}

#[no_mangle]
pub extern "C" fn vsXor2(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.xor2(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsImplies(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.implies(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsIff(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.iff(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsEq(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.eq(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsNeq(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.neq(term(a), term(b)))
}

/// # Safety
/// - `args` must point to `n` terms.
#[no_mangle]
pub extern "C" fn vsDistinct(n: u32, args: *const VsTerm) -> VsTerm {
    let args = unsafe { term_array(args, n) };
    build_term(|t| t.distinct(&args))
}

#[no_mangle]
pub extern "C" fn vsIte(c: VsTerm, a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.ite(term(c), term(a), term(b)))
}

/// # Safety
/// - `args` must point to `n` terms.
#[no_mangle]
pub extern "C" fn vsApplication(f: VsTerm, n: u32, args: *const VsTerm) -> VsTerm {
    let args = unsafe { term_array(args, n) };
    build_term(|t| t.application(term(f), &args))
}

/// # Safety
/// - `vars` must point to `n` variables.
#[no_mangle]
pub extern "C" fn vsForall(n: u32, vars: *const VsTerm, body: VsTerm) -> VsTerm {
    let vars = unsafe { term_array(vars, n) };
    build_term(|t| t.forall(&vars, term(body)))
}

/// # Safety
/// - `vars` must point to `n` variables.
#[no_mangle]
pub extern "C" fn vsExists(n: u32, vars: *const VsTerm, body: VsTerm) -> VsTerm {
    let vars = unsafe { term_array(vars, n) };
    build_term(|t| t.exists(&vars, term(body)))
}

#[no_mangle]
pub extern "C" fn vsBvconstUint64(size: u32, value: u64) -> VsTerm {
    build_term(|t| t.bv_const(size, value))
}

#[no_mangle]
pub extern "C" fn vsBvadd(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_add(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvsub(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_sub(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvmul(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_mul(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvneg(a: VsTerm) -> VsTerm {
    build_term(|t| t.bv_neg(term(a)))
}

#[no_mangle]
pub extern "C" fn vsBvpower(a: VsTerm, degree: u32) -> VsTerm {
    build_term(|t| t.bv_power(term(a), degree as u64))
}

#[no_mangle]
pub extern "C" fn vsBvge(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_ge(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvgt(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_gt(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvle(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_le(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvlt(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_lt(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvsge(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_sge(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvsgt(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_sgt(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvsle(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_sle(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBvslt(a: VsTerm, b: VsTerm) -> VsTerm {
    build_term(|t| t.bv_slt(term(a), term(b)))
}

#[no_mangle]
pub extern "C" fn vsBitextract(a: VsTerm, i: u32) -> VsTerm {
    build_term(|t| t.bit_select(term(a), i))
}

/// Replaces `vars[i]` by `map[i]` in `t`.
///
/// # Safety
/// - `vars` and `map` must each point to `n` terms.
#[no_mangle]
pub extern "C" fn vsSubstTerm(n: u32, vars: *const VsTerm, map: *const VsTerm, t: VsTerm) -> VsTerm {
    let vars = unsafe { term_array(vars, n) };
    let map = unsafe { term_array(map, n) };
    let pairs: Vec<(Term, Term)> = vars.into_iter().zip(map).collect();
    build_term(|table| table.subst_term(&pairs, term(t)))
}

// ---------------------------------------------------------------------------------
// Term exploration
// ---------------------------------------------------------------------------------

/// Constructor of `t` as a `TermConstructor` number, -1 on error.
#[no_mangle]
pub extern "C" fn vsTermConstructor(t: VsTerm) -> i32 {
    with_engine(-1, |e| e.query(|table| table.constructor(term(t)).map(|c| c as i32)))
}

#[no_mangle]
pub extern "C" fn vsTermNumChildren(t: VsTerm) -> i32 {
    with_engine(-1, |e| e.query(|table| table.num_children(term(t)).map(|n| n as i32)))
}

#[no_mangle]
pub extern "C" fn vsTermChild(t: VsTerm, i: u32) -> VsTerm {
    with_engine(VS_NULL_TERM, |e| {
        e.query(|table| table.child(term(t), i as usize).map(c_term))
    })
}

/// Stores the children of `t` in `v`. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `v` must point to an initialized `VsTermVector`.
#[no_mangle]
pub extern "C" fn vsTermChildren(t: VsTerm, v: *mut VsTermVector) -> i32 {
    if v.is_null() {
        return -1;
    }
    with_engine(-1, |e| {
        let children = e.query(|table| table.children(term(t)))?;
        fill_vector(unsafe { &mut *v }, &children);
        Ok(0)
    })
}

#[no_mangle]
pub extern "C" fn vsTermIsAtomic(t: VsTerm) -> i32 {
    with_engine(0, |e| e.query(|table| table.is_atomic(term(t)).map(c_bool)))
}

#[no_mangle]
pub extern "C" fn vsTermIsComposite(t: VsTerm) -> i32 {
    with_engine(0, |e| e.query(|table| table.is_composite(term(t)).map(c_bool)))
}

#[no_mangle]
pub extern "C" fn vsTermIsSum(t: VsTerm) -> i32 {
    with_engine(0, |e| e.query(|table| table.is_sum(term(t)).map(c_bool)))
}

#[no_mangle]
pub extern "C" fn vsTermIsProduct(t: VsTerm) -> i32 {
    with_engine(0, |e| e.query(|table| table.is_product(term(t)).map(c_bool)))
}

#[no_mangle]
pub extern "C" fn vsTermIsBool(t: VsTerm) -> i32 {
    with_engine(0, |e| {
        e.query(|table| {
            table.check(term(t))?;
            Ok(c_bool(table.is_bool(term(t))))
        })
    })
}

/// # Safety
/// - `val` must be a valid pointer to an `int32_t`.
#[no_mangle]
pub extern "C" fn vsBoolConstValue(t: VsTerm, val: *mut i32) -> i32 {
    if val.is_null() {
        return -1;
    }
    with_engine(-1, |e| {
        let b = e.query(|table| table.bool_const_value(term(t)))?;
        unsafe { *val = c_bool(b) };
        Ok(0)
    })
}

/// # Safety
/// - `val` must be a valid pointer to a `uint64_t`.
#[no_mangle]
pub extern "C" fn vsBvConstValue(t: VsTerm, val: *mut u64) -> i32 {
    if val.is_null() {
        return -1;
    }
    with_engine(-1, |e| {
        let v = e.query(|table| table.bv_const_value(term(t)))?;
        unsafe { *val = v };
        Ok(0)
    })
}

#[no_mangle]
pub extern "C" fn vsProjIndex(t: VsTerm) -> i32 {
    with_engine(-1, |e| e.query(|table| table.projection_index(term(t)).map(|i| i as i32)))
}

/// Pretty-prints `t`. The result must be released with `vsFreeString`.
#[no_mangle]
pub extern "C" fn vsTermToString(t: VsTerm, width: u32) -> *mut c_char {
    let text = with_engine(None, |e| {
        e.query(|table| {
            table.check(term(t))?;
            Ok(Some(table.term_to_string(term(t), width as usize)))
        })
    });
    text.map_or(std::ptr::null_mut(), c_string)
}

#[no_mangle]
pub extern "C" fn vsTypeToString(tau: VsType, width: u32) -> *mut c_char {
    let text = with_engine(None, |e| {
        e.query(|table| {
            table.types().check(ty(tau))?;
            Ok(Some(table.type_to_string(ty(tau), width as usize)))
        })
    });
    text.map_or(std::ptr::null_mut(), c_string)
}

// ---------------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------------

/// # Safety
/// - `name` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsSetTermName(t: VsTerm, name: *const c_char) -> i32 {
    let name = unsafe { string_arg(name) };
    with_engine(-1, |e| status_code(e.build(|table| table.set_term_name(term(t), &name))))
}

/// Removes the current binding of `name`, restoring the one it shadowed.
///
/// # Safety
/// - `name` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsRemoveTermName(name: *const c_char) {
    let name = unsafe { string_arg(name) };
    with_engine((), |e| {
        e.terms_mut().remove_term_name(&name);
        Ok(())
    })
}

/// # Safety
/// - `name` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsGetTermByName(name: *const c_char) -> VsTerm {
    let name = unsafe { string_arg(name) };
    with_engine(VS_NULL_TERM, |e| {
        Ok(e.terms().get_term_by_name(&name).map_or(VS_NULL_TERM, c_term))
    })
}

/// Name of `t`, or null. The result must be released with `vsFreeString`.
#[no_mangle]
pub extern "C" fn vsGetTermName(t: VsTerm) -> *mut c_char {
    let name = with_engine(None, |e| Ok(e.terms().get_term_name(term(t)).map(str::to_owned)));
    name.map_or(std::ptr::null_mut(), c_string)
}

#[no_mangle]
pub extern "C" fn vsClearTermName(t: VsTerm) -> i32 {
    with_engine(-1, |e| status_code(e.build(|table| table.clear_term_name(term(t)))))
}

/// # Safety
/// - `name` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsSetTypeName(tau: VsType, name: *const c_char) -> i32 {
    let name = unsafe { string_arg(name) };
    with_engine(-1, |e| status_code(e.build(|table| table.set_type_name(ty(tau), &name))))
}

/// # Safety
/// - `name` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsRemoveTypeName(name: *const c_char) {
    let name = unsafe { string_arg(name) };
    with_engine((), |e| {
        e.terms_mut().remove_type_name(&name);
        Ok(())
    })
}

/// # Safety
/// - `name` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsGetTypeByName(name: *const c_char) -> VsType {
    let name = unsafe { string_arg(name) };
    with_engine(VS_NULL_TYPE, |e| {
        Ok(e.terms().get_type_by_name(&name).map_or(VS_NULL_TYPE, c_type))
    })
}

#[no_mangle]
pub extern "C" fn vsGetTypeName(tau: VsType) -> *mut c_char {
    let name = with_engine(None, |e| Ok(e.terms().get_type_name(ty(tau)).map(str::to_owned)));
    name.map_or(std::ptr::null_mut(), c_string)
}

#[no_mangle]
pub extern "C" fn vsClearTypeName(tau: VsType) -> i32 {
    with_engine(-1, |e| status_code(e.build(|table| table.clear_type_name(ty(tau)))))
}

// ---------------------------------------------------------------------------------
// Garbage collection
// ---------------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vsIncrefTerm(t: VsTerm) -> i32 {
    with_engine(-1, |e| status_code(e.build(|table| table.incref_term(term(t)))))
}

#[no_mangle]
pub extern "C" fn vsDecrefTerm(t: VsTerm) -> i32 {
    with_engine(-1, |e| status_code(e.build(|table| table.decref_term(term(t)))))
}

#[no_mangle]
pub extern "C" fn vsIncrefType(tau: VsType) -> i32 {
    with_engine(-1, |e| status_code(e.build(|table| table.types_mut().incref(ty(tau)))))
}

#[no_mangle]
pub extern "C" fn vsDecrefType(tau: VsType) -> i32 {
    with_engine(-1, |e| status_code(e.build(|table| table.types_mut().decref(ty(tau)))))
}

#[no_mangle]
pub extern "C" fn vsNumTerms() -> u32 {
    with_engine(0, |e| Ok(e.terms().num_terms() as u32))
}

#[no_mangle]
pub extern "C" fn vsNumTypes() -> u32 {
    with_engine(0, |e| Ok(e.terms().num_types() as u32))
}

/// Deletes every term and type not reachable from the given roots, the live contexts
/// and models, the positive reference counts and, when `keepNamed` is set, the names.
///
/// # Safety
/// - `t` must point to `nt` terms and `tau` to `ntau` types.
///cbindgen:rename-all=CamelCase
#[no_mangle]
pub extern "C" fn vsGarbageCollect(
    t: *const VsTerm,
    nt: u32,
    tau: *const VsType,
    ntau: u32,
    keep_named: i32,
) {
    let terms = unsafe { term_array(t, nt) };
    let types = unsafe { type_array(tau, ntau) };
    with_engine((), |e| {
        e.garbage_collect(&terms, &types, keep_named != 0);
        Ok(())
    })
}

// ---------------------------------------------------------------------------------
// Configurations and parameters
// ---------------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn vsNewConfig() -> *mut VsCtxConfig {
    Box::into_raw(Box::new(VsCtxConfig(ContextConfig::default())))
}

/// Sets one configuration entry (`mode`, `var-elim`, `bvarith-elim`, `flatten`).
///
/// # Safety
/// - `config` must come from `vsNewConfig`; `name` and `value` must be NUL-terminated.
#[no_mangle]
pub extern "C" fn vsSetConfig(config: *mut VsCtxConfig, name: *const c_char, value: *const c_char) -> i32 {
    if config.is_null() {
        return -1;
    }
    let config = unsafe { &mut *config };
    let (name, value) = unsafe { (string_arg(name), string_arg(value)) };
    with_engine(-1, |_| status_code(config.0.set(&name, &value)))
}

/// # Safety
/// - `config` must come from `vsNewConfig` and must not be used afterwards.
#[no_mangle]
pub extern "C" fn vsFreeConfig(config: *mut VsCtxConfig) {
    if config.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(config));
    }
}

#[no_mangle]
pub extern "C" fn vsNewParamRecord() -> *mut VsParamRecord {
    Box::into_raw(Box::new(VsParamRecord(SearchParams::default())))
}

/// Sets one search parameter by name; the record is unchanged on error.
///
/// # Safety
/// - `params` must come from `vsNewParamRecord`; `name` and `value` must be
///   NUL-terminated.
#[no_mangle]
pub extern "C" fn vsSetParam(params: *mut VsParamRecord, name: *const c_char, value: *const c_char) -> i32 {
    if params.is_null() {
        return -1;
    }
    let params = unsafe { &mut *params };
    let (name, value) = unsafe { (string_arg(name), string_arg(value)) };
    with_engine(-1, |_| status_code(params.0.set(&name, &value)))
}

/// # Safety
/// - `params` must come from `vsNewParamRecord` and must not be used afterwards.
#[no_mangle]
pub extern "C" fn vsFreeParamRecord(params: *mut VsParamRecord) {
    if params.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(params));
    }
}

// ---------------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------------

/// Creates a context; a null `config` selects the default configuration.
///
/// # Safety
/// - `config` must come from `vsNewConfig`, or be null.
#[no_mangle]
pub extern "C" fn vsNewContext(config: *const VsCtxConfig) -> *mut VsContext {
    let config = if config.is_null() {
        ContextConfig::default()
    } else {
        unsafe { (*config).0.clone() }
    };
    let handle = with_engine(None, |e| {
        let key = e.new_context(config);
        let interrupt = e.interrupt_handle(key)?;
        Ok(Some(VsContext { key, interrupt }))
    });
    handle.map_or(std::ptr::null_mut(), |h| Box::into_raw(Box::new(h)))
}

/// # Safety
/// - `ctx` must come from `vsNewContext` and must not be used afterwards.
#[no_mangle]
pub extern "C" fn vsFreeContext(ctx: *mut VsContext) {
    if ctx.is_null() {
        return;
    }
    let ctx = unsafe { Box::from_raw(ctx) };
    with_engine((), |e| e.free_context(ctx.key));
}

fn with_context<T>(ctx: *const VsContext, sentinel: T, f: impl FnOnce(&mut Engine, ContextKey) -> VsResult<T>) -> T {
    if ctx.is_null() {
        return sentinel;
    }
    let key = unsafe { (*ctx).key };
    with_engine(sentinel, |e| f(e, key))
}

/// Status of the context as a `Status` number, `VS_STATUS_ERROR` on error.
#[no_mangle]
pub extern "C" fn vsContextStatus(ctx: *const VsContext) -> i32 {
    with_context(ctx, VS_STATUS_ERROR, |e, key| e.context_status(key).map(|s| s as i32))
}

#[no_mangle]
pub extern "C" fn vsResetContext(ctx: *mut VsContext) {
    with_context(ctx, (), |e, key| e.reset_context(key))
}

#[no_mangle]
pub extern "C" fn vsPush(ctx: *mut VsContext) -> i32 {
    with_context(ctx, -1, |e, key| status_code(e.push(key)))
}

#[no_mangle]
pub extern "C" fn vsPop(ctx: *mut VsContext) -> i32 {
    with_context(ctx, -1, |e, key| status_code(e.pop(key)))
}

/// # Safety
/// - `option` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsContextEnableOption(ctx: *mut VsContext, option: *const c_char) -> i32 {
    let option = unsafe { string_arg(option) };
    with_context(ctx, -1, |e, key| status_code(e.enable_option(key, &option)))
}

/// # Safety
/// - `option` must be a NUL-terminated string.
#[no_mangle]
pub extern "C" fn vsContextDisableOption(ctx: *mut VsContext, option: *const c_char) -> i32 {
    let option = unsafe { string_arg(option) };
    with_context(ctx, -1, |e, key| status_code(e.disable_option(key, &option)))
}

#[no_mangle]
pub extern "C" fn vsAssertFormula(ctx: *mut VsContext, t: VsTerm) -> i32 {
    with_context(ctx, -1, |e, key| status_code(e.assert_formula(key, term(t))))
}

/// # Safety
/// - `t` must point to `n` terms.
#[no_mangle]
pub extern "C" fn vsAssertFormulas(ctx: *mut VsContext, n: u32, t: *const VsTerm) -> i32 {
    let formulas = unsafe { term_array(t, n) };
    with_context(ctx, -1, |e, key| status_code(e.assert_formulas(key, &formulas)))
}

/// Runs the search and returns the resulting `Status` number, `VS_STATUS_ERROR` on
/// error. A null
/// `params` selects the default parameters.
///
/// # Safety
/// - `params` must come from `vsNewParamRecord`, or be null.
#[no_mangle]
pub extern "C" fn vsCheckContext(ctx: *mut VsContext, params: *const VsParamRecord) -> i32 {
    let params = if params.is_null() {
        None
    } else {
        Some(unsafe { &(*params).0 })
    };
    with_context(ctx, VS_STATUS_ERROR, |e, key| e.check(key, params).map(|s: Status| s as i32))
}

/// Asks a running `vsCheckContext` to stop. Only sets a flag: safe from another thread
/// or a signal handler.
#[no_mangle]
pub extern "C" fn vsStopSearch(ctx: *const VsContext) {
    if ctx.is_null() {
        return;
    }
    unsafe { (*ctx).interrupt.interrupt() };
}

#[no_mangle]
pub extern "C" fn vsAssertBlockingClause(ctx: *mut VsContext) -> i32 {
    with_context(ctx, -1, |e, key| status_code(e.assert_blocking_clause(key)))
}

/// Builds a model of a satisfiable context, or null on error.
#[no_mangle]
pub extern "C" fn vsGetModel(ctx: *mut VsContext, keep_subst: i32) -> *mut VsModel {
    let key = with_context(ctx, None, |e, key| e.get_model(key, keep_subst != 0).map(Some));
    key.map_or(std::ptr::null_mut(), |k| Box::into_raw(Box::new(VsModel(k))))
}

// ---------------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------------

/// # Safety
/// - `model` must come from `vsGetModel` and must not be used afterwards.
#[no_mangle]
pub extern "C" fn vsFreeModel(model: *mut VsModel) {
    if model.is_null() {
        return;
    }
    let model = unsafe { Box::from_raw(model) };
    with_engine((), |e| e.free_model(model.0));
}

fn with_model<T>(model: *const VsModel, sentinel: T, f: impl FnOnce(&mut Engine, ModelKey) -> VsResult<T>) -> T {
    if model.is_null() {
        return sentinel;
    }
    let key = unsafe { (*model).0 };
    with_engine(sentinel, |e| f(e, key))
}

/// # Safety
/// - `val` must be a valid pointer to an `int32_t`.
#[no_mangle]
pub extern "C" fn vsGetBoolValue(model: *const VsModel, t: VsTerm, val: *mut i32) -> i32 {
    if val.is_null() {
        return -1;
    }
    with_model(model, -1, |e, key| {
        let b = e.get_bool_value(key, term(t))?;
        unsafe { *val = c_bool(b) };
        Ok(0)
    })
}

/// Stores the bits of `t`, least significant first, in `val`.
///
/// # Safety
/// - `val` must have room for `vsTermBitsize(t)` integers.
#[no_mangle]
pub extern "C" fn vsGetBvValue(model: *const VsModel, t: VsTerm, val: *mut i32) -> i32 {
    if val.is_null() {
        return -1;
    }
    with_model(model, -1, |e, key| {
        let bits = e.get_bv_value(key, term(t))?;
        for (i, b) in bits.into_iter().enumerate() {
            unsafe { *val.add(i) = c_bool(b) };
        }
        Ok(0)
    })
}

/// 1 if `f` is true in the model, 0 if false, -1 on error.
#[no_mangle]
pub extern "C" fn vsFormulaTrueInModel(model: *const VsModel, f: VsTerm) -> i32 {
    with_model(model, -1, |e, key| e.formula_true(key, term(f)).map(c_bool))
}

/// # Safety
/// - `f` must point to `n` terms.
#[no_mangle]
pub extern "C" fn vsFormulasTrueInModel(model: *const VsModel, n: u32, f: *const VsTerm) -> i32 {
    let formulas = unsafe { term_array(f, n) };
    with_model(model, -1, |e, key| e.formulas_true(key, &formulas).map(c_bool))
}

/// The result must be released with `vsFreeString`.
#[no_mangle]
pub extern "C" fn vsModelToString(model: *const VsModel, width: u32) -> *mut c_char {
    let text = with_model(model, None, |e, key| e.model_to_string(key, width as usize).map(Some));
    text.map_or(std::ptr::null_mut(), c_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_string(s: *mut c_char) -> String {
        assert!(!s.is_null());
        let text = unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned();
        vsFreeString(s);
        text
    }

    // Single test: every call shares the process-wide engine.
    #[test]
    fn smoke() {
        vsInit();

        let mut version = VsVersionInfo {
            major: 0,
            minor: 0,
            patch: 0,
        };
        vsGetVersion(&mut version);
        assert_eq!(version.minor, 1);

        // Errors land in the record and survive later successes.
        assert_eq!(vsBvType(0), VS_NULL_TYPE);
        assert_eq!(vsErrorCode(), ErrorCode::PosIntRequired as i32);
        let bv4 = vsBvType(4);
        assert!(bv4 >= 0);
        assert_eq!(vsErrorCode(), ErrorCode::PosIntRequired as i32);
        assert!(!take_string(vsErrorString()).is_empty());
        vsClearError();
        assert_eq!(vsErrorCode(), 0);

        let x = vsNewUninterpretedTerm(bv4);
        let name = CString::new("x").unwrap();
        assert_eq!(vsSetTermName(x, name.as_ptr()), 0);
        assert_eq!(vsGetTermByName(name.as_ptr()), x);
        assert_eq!(take_string(vsGetTermName(x)), "x");

        let three = vsBvconstUint64(4, 3);
        let ge = vsBvge(x, three);
        let lt = vsBvlt(x, vsBvconstUint64(4, 5));
        assert_eq!(vsTermBitsize(x), 4);
        assert_eq!(vsTermConstructor(ge), vsterms::TermConstructor::BvGe as i32);

        let mut children = VsTermVector {
            capacity: 0,
            size: 0,
            data: std::ptr::null_mut(),
        };
        vsInitTermVector(&mut children);
        assert_eq!(vsTermChildren(ge, &mut children), 0);
        assert_eq!(children.size, 2);
        assert_eq!(unsafe { *children.data }, x);
        vsDeleteTermVector(&mut children);
        assert!(children.data.is_null());

        let ctx = vsNewContext(std::ptr::null());
        assert!(!ctx.is_null());
        let formulas = [ge, lt];
        assert_eq!(vsAssertFormulas(ctx, 2, formulas.as_ptr()), 0);

        let params = vsNewParamRecord();
        let (key, bad) = (CString::new("var-decay").unwrap(), CString::new("2.5").unwrap());
        assert_eq!(vsSetParam(params, key.as_ptr(), bad.as_ptr()), -1);
        assert_eq!(vsErrorCode(), ErrorCode::CtxInvalidParameterValue as i32);
        assert_eq!(vsCheckContext(ctx, params), Status::Sat as i32);
        vsFreeParamRecord(params);

        let model = vsGetModel(ctx, 0);
        assert!(!model.is_null());
        let mut bits = [0i32; 4];
        assert_eq!(vsGetBvValue(model, x, bits.as_mut_ptr()), 0);
        let value = bits.iter().rev().fold(0, |acc, &b| acc << 1 | b);
        assert!(value == 3 || value == 4);
        assert_eq!(vsFormulasTrueInModel(model, 2, formulas.as_ptr()), 1);
        assert!(take_string(vsModelToString(model, 80)).contains("(= x 0b"));
        vsFreeModel(model);

        assert_eq!(vsPop(ctx), -1);
        assert_eq!(vsErrorCode(), ErrorCode::CtxInvalidOperation as i32);

        vsFreeContext(ctx);
        vsExit();
        assert_eq!(vsBvType(8), VS_NULL_TYPE);
    }
}

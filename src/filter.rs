//! The HDF5 filter surface.
//!
//! HDF5 hands the filter one chunk of raw element bytes at a time. The
//! chunk is cut into equal sub-chunks that become the frames of one
//! container, with the remainder in a second, single-frame container;
//! the two serialized containers are simply concatenated. Decompression
//! parses them back in sequence. The C entry points mirror the
//! `H5Z_class2_t` protocol so the shared library registers as filter
//! `32029` without a build-time HDF5 dependency.

use std::os::raw::{c_char, c_int, c_uint, c_void};

use log::error;

use crate::container::Terse;
use crate::error::TrpxError;
use crate::pool::Parallelism;
use crate::sample::{Mode, Sample};

/// Registered HDF5 filter id.
pub const FILTER_ID: c_int = 32029;
/// Symbolic filter name.
pub const FILTER_NAME: &[u8] = b"TERSE\0";
/// Elements per sub-chunk container frame.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 18;

const H5Z_FLAG_REVERSE: c_uint = 0x0100;
const H5Z_CLASS_T_VERS: c_int = 1;
const H5PL_TYPE_FILTER: c_int = 0;

/// Element type of a dataset, carried in `cd_values[0]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeCode {
    Int16 = 0,
    Uint16 = 1,
    Int32 = 2,
    Uint32 = 3,
    Int8 = 4,
    Uint8 = 5,
}

impl TypeCode {
    pub fn from_cd_value(value: u32) -> Option<TypeCode> {
        match value {
            0 => Some(TypeCode::Int16),
            1 => Some(TypeCode::Uint16),
            2 => Some(TypeCode::Int32),
            3 => Some(TypeCode::Uint32),
            4 => Some(TypeCode::Int8),
            5 => Some(TypeCode::Uint8),
            _ => None,
        }
    }
}

macro_rules! dispatch_type {
    ($code:expr, $func:ident ( $($arg:expr),* )) => {
        match $code {
            TypeCode::Int16 => $func::<i16>($($arg),*),
            TypeCode::Uint16 => $func::<u16>($($arg),*),
            TypeCode::Int32 => $func::<i32>($($arg),*),
            TypeCode::Uint32 => $func::<u32>($($arg),*),
            TypeCode::Int8 => $func::<i8>($($arg),*),
            TypeCode::Uint8 => $func::<u8>($($arg),*),
        }
    };
}

/// Compress one HDF5 chunk of raw element bytes. `chunk_size` elements
/// per frame; zero disables splitting.
pub fn compress_buffer(
    code: TypeCode,
    bytes: &[u8],
    chunk_size: usize,
) -> Result<Vec<u8>, TrpxError> {
    dispatch_type!(code, compress_typed(bytes, chunk_size))
}

/// Decompress the one or two concatenated containers of a compressed
/// chunk back into raw element bytes.
pub fn decompress_buffer(code: TypeCode, bytes: &[u8]) -> Result<Vec<u8>, TrpxError> {
    dispatch_type!(code, decompress_typed(bytes))
}

fn compress_typed<T: Sample>(bytes: &[u8], chunk_size: usize) -> Result<Vec<u8>, TrpxError> {
    if bytes.len() % std::mem::size_of::<T>() != 0 {
        return Err(TrpxError::ShapeMismatch {
            expected: bytes.len() / std::mem::size_of::<T>() * std::mem::size_of::<T>(),
            got: bytes.len(),
        });
    }
    let values: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
    split_compress(&values, chunk_size)
}

fn decompress_typed<T: Sample>(bytes: &[u8]) -> Result<Vec<u8>, TrpxError> {
    let values: Vec<T> = split_decompress(bytes)?;
    Ok(bytemuck::cast_slice(&values).to_vec())
}

/// Cut `values` into `chunk_size`-element frames plus a tail. The loop
/// bound is strict, so a final exact-multiple chunk lands in the tail
/// container rather than leaving it empty.
fn split_compress<T: Sample>(values: &[T], chunk_size: usize) -> Result<Vec<u8>, TrpxError> {
    let mut chunks = Terse::with_parallelism(Parallelism::default())?;
    let mut rest = Terse::new();
    if chunk_size == 0 {
        chunks.push_back(values, Mode::Auto)?;
    } else {
        let mut pos = 0;
        while pos + chunk_size < values.len() {
            chunks.push_back_owned(values[pos..pos + chunk_size].to_vec(), Mode::Auto)?;
            pos += chunk_size;
        }
        rest.push_back(&values[pos..], Mode::Auto)?;
    }
    let mut out = Vec::with_capacity(chunks.file_size()? + rest.file_size()?);
    chunks.write(&mut out)?;
    rest.write(&mut out)?;
    Ok(out)
}

fn split_decompress<T: Sample>(bytes: &[u8]) -> Result<Vec<T>, TrpxError> {
    let mut input = bytes;
    let mut chunks = Terse::read(&mut input)?;
    chunks.set_parallelism(Parallelism::default())?;
    let rest = Terse::read_opt(&mut input)?;
    let chunk_total = chunks.size() * chunks.number_of_frames();
    let rest_total = rest
        .as_ref()
        .map(|r| r.size() * r.number_of_frames())
        .unwrap_or(0);
    let mut out = vec![T::ZERO; chunk_total + rest_total];
    chunks.prolix_all(&mut out[..chunk_total])?;
    if let Some(mut rest) = rest {
        rest.prolix_all(&mut out[chunk_total..])?;
    }
    Ok(out)
}

/// The filter callback HDF5 invokes for both directions.
///
/// Compression replaces `*buf` with a freshly `malloc`ed buffer holding
/// the serialized containers and returns its byte count; decompression
/// does the inverse. Returns 0 on any failure, leaving the input buffer
/// untouched for HDF5 to reclaim.
///
/// # Safety
///
/// `cd_values` must point to at least `cd_nelmts` values, and `buf` and
/// `buf_size` must describe a live allocation of at least `*buf_size`
/// bytes that HDF5 owns and may free.
#[no_mangle]
pub unsafe extern "C" fn trpx_hdf5_filter(
    flags: c_uint,
    cd_nelmts: usize,
    cd_values: *const c_uint,
    _nbytes: usize,
    buf_size: *mut usize,
    buf: *mut *mut c_void,
) -> usize {
    let result = std::panic::catch_unwind(|| {
        if buf.is_null() || buf_size.is_null() || cd_values.is_null() || cd_nelmts == 0 {
            error!("filter invoked with invalid arguments");
            return 0;
        }
        let Some(code) = TypeCode::from_cd_value(*cd_values) else {
            error!("filter invoked with unknown type code {}", *cd_values);
            return 0;
        };
        let input = std::slice::from_raw_parts(*buf as *const u8, *buf_size);
        let produced = if flags & H5Z_FLAG_REVERSE != 0 {
            decompress_buffer(code, input)
        } else {
            compress_buffer(code, input, DEFAULT_CHUNK_SIZE)
        };
        let produced = match produced {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("filter failed: {e}");
                return 0;
            }
        };
        let new_buf = libc::malloc(produced.len());
        if new_buf.is_null() {
            error!("allocation of {} bytes failed in filter", produced.len());
            return 0;
        }
        std::ptr::copy_nonoverlapping(produced.as_ptr(), new_buf as *mut u8, produced.len());
        libc::free(*buf);
        *buf = new_buf;
        *buf_size = produced.len();
        produced.len()
    });
    result.unwrap_or(0)
}

/// `H5Z_class2_t` mirror, declared locally so registration needs no
/// HDF5 headers at build time.
#[repr(C)]
pub struct H5ZClass2 {
    pub version: c_int,
    pub id: c_int,
    pub encoder_present: c_uint,
    pub decoder_present: c_uint,
    pub name: *const c_char,
    pub can_apply: Option<unsafe extern "C" fn()>,
    pub set_local: Option<unsafe extern "C" fn()>,
    pub filter: Option<
        unsafe extern "C" fn(
            c_uint,
            usize,
            *const c_uint,
            usize,
            *mut usize,
            *mut *mut c_void,
        ) -> usize,
    >,
}

struct ClassCell(H5ZClass2);

// The record only holds function pointers and a static name.
unsafe impl Sync for ClassCell {}

static FILTER_CLASS: ClassCell = ClassCell(H5ZClass2 {
    version: H5Z_CLASS_T_VERS,
    id: FILTER_ID,
    encoder_present: 1,
    decoder_present: 1,
    name: FILTER_NAME.as_ptr() as *const c_char,
    can_apply: None,
    set_local: None,
    filter: Some(trpx_hdf5_filter),
});

#[no_mangle]
pub extern "C" fn H5PLget_plugin_type() -> c_int {
    H5PL_TYPE_FILTER
}

#[no_mangle]
pub extern "C" fn H5PLget_plugin_info() -> *const c_void {
    &FILTER_CLASS.0 as *const H5ZClass2 as *const c_void
}

//! The HDF5 chunk/tail split and its byte-level round trip.

use trpx::filter::{compress_buffer, decompress_buffer, TypeCode, DEFAULT_CHUNK_SIZE};
use trpx::Terse;

#[test]
fn chunk_split_fixture() {
    // 300000 values with the default 262144-element sub-chunk: one full
    // chunk container plus a 37856-value tail container
    let values: Vec<u16> = (0..300000u32).map(|i| (i % 4096) as u16).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&values);
    let compressed = compress_buffer(TypeCode::Uint16, bytes, DEFAULT_CHUNK_SIZE).unwrap();

    let mut input = compressed.as_slice();
    let chunks = Terse::read(&mut input).unwrap();
    let rest = Terse::read(&mut input).unwrap();
    assert_eq!(chunks.number_of_frames(), 1);
    assert_eq!(chunks.size(), DEFAULT_CHUNK_SIZE);
    assert_eq!(rest.number_of_frames(), 1);
    assert_eq!(rest.size(), 300000 - DEFAULT_CHUNK_SIZE);

    let restored = decompress_buffer(TypeCode::Uint16, &compressed).unwrap();
    assert_eq!(restored, bytes);
}

#[test]
fn all_type_codes_roundtrip() {
    fn check<T: trpx::Sample>(code: TypeCode, values: Vec<T>) {
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        let compressed = compress_buffer(code, bytes, 64).unwrap();
        let restored = decompress_buffer(code, &compressed).unwrap();
        assert_eq!(restored, bytes, "{code:?}");
    }
    check(TypeCode::Int8, (0..200).map(|i| (i % 100 - 50) as i8).collect());
    check(TypeCode::Uint8, (0..200).map(|i| (i % 250) as u8).collect());
    check(TypeCode::Int16, (0..200).map(|i| (i * 7 - 600) as i16).collect());
    check(TypeCode::Uint16, (0..200).map(|i| (i * 327) as u16).collect());
    check(TypeCode::Int32, (0..200).map(|i| (i * 100003 - 8000000) as i32).collect());
    check(TypeCode::Uint32, (0..200).map(|i| (i as i64 * 20000717) as u32).collect());
}

#[test]
fn unknown_type_code_is_rejected() {
    assert!(TypeCode::from_cd_value(6).is_none());
    assert_eq!(TypeCode::from_cd_value(3), Some(TypeCode::Uint32));
}

#[test]
fn filter_blob_has_no_third_container() {
    let values = vec![50u8; 1000];
    let compressed = compress_buffer(TypeCode::Uint8, &values, 400).unwrap();
    let mut input = compressed.as_slice();
    let chunks = Terse::read(&mut input).unwrap();
    assert_eq!(chunks.number_of_frames(), 2);
    let rest = Terse::read(&mut input).unwrap();
    assert_eq!(rest.size(), 200);
    assert!(Terse::read_opt(&mut input).unwrap().is_none());
}

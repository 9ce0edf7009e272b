//! Byte views of plain-data types, for writing frames to disk and reading
//! them back.

use std::mem;

/// A marker trait for types that can be saved by simply writing out their bytes.
///
/// Implementing this asserts that the type holds no pointers and no padding
/// whose contents matter.
pub unsafe trait Simple: Copy {}

/// Given a slice, return a byte slice of its contents.
pub fn slice_as_bytes<T: Simple>(r: &[T]) -> &[u8] {
    // Safe because `T: Simple`.
    unsafe { std::slice::from_raw_parts(r.as_ptr() as *const u8, mem::size_of_val(r)) }
}

/// Given a reference, return a byte slice of the value's representation.
pub fn as_bytes<T: Simple>(r: &T) -> &[u8] {
    slice_as_bytes(std::slice::from_ref(r))
}

/// Rebuild a `[T]` from bytes written by `slice_as_bytes`.
///
/// Safety: `bytes` must have been produced from a `[T]` by this same build.
/// `Simple` does not promise that every bit pattern is a valid `T` (enum
/// discriminants and `bool`s are not), so the caller has to vouch for the
/// source of the bytes.
pub unsafe fn vec_from_bytes<T: Simple>(bytes: &[u8]) -> Option<Vec<T>> {
    let size = mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return None;
    }
    let len = bytes.len() / size;
    let mut vec: Vec<T> = Vec::with_capacity(len);
    // `Vec`'s buffer is aligned for `T`; `bytes` may not be, so copy rather
    // than reinterpret in place.
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), vec.as_mut_ptr() as *mut u8, bytes.len());
    vec.set_len(len);
    Some(vec)
}

macro_rules! implement_simple {
    ( $( $type:ty ),* ) => {
        $(
            unsafe impl Simple for $type { }
        )*
    }
}

implement_simple!(u8, u32, i32, f32, f64, usize, bool);

#[test]
fn bytes_round_trip() {
    let values = [1.5_f32, -2.0, 0.25];
    let bytes = slice_as_bytes(&values).to_vec();
    assert_eq!(bytes.len(), 12);
    let back: Vec<f32> = unsafe { vec_from_bytes(&bytes) }.unwrap();
    assert_eq!(back, values);
    assert!(unsafe { vec_from_bytes::<f32>(&bytes[1..]) }.is_none());
}

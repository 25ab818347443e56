//! Mapping Rust types onto HDF5 datatypes and moving values through
//! buffers.
//!
//! * [`H5DType`] gives the datatype of a value. Some types size their
//!   datatype by value: [`FLString`] and [`FLVector`].
//! * [`StaticH5DType`] gives the datatype of a type.
//! * [`BufferWrite`] stores a value in a buffer, [`BufferRead`] loads one.
//!   Both convert through [`crate::conversion`] when the buffer holds a
//!   different datatype than the Rust type's own.

use std::fmt;
use std::ops::Deref;

use h5composites_format::vl_data::make_slot;

use crate::buffer::{H5Buffer, H5BufferConstView, H5BufferView};
use crate::common_dtype::common_dtype;
use crate::conversion::convert;
use crate::dtype::{packed_compound, DType, DTypeClass, DTypeExt};
use crate::error::{Error, Result};
use crate::printing::display;

/// Datatype of a value.
pub trait H5DType {
    fn h5_dtype(&self) -> DType;
}

/// Datatype shared by every value of a type.
pub trait StaticH5DType {
    fn static_h5_dtype() -> DType;
}

/// Store a value in a buffer.
pub trait BufferWrite: H5DType {
    /// Write into a view whose datatype is exactly `self.h5_dtype()`.
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()>;

    /// Write into a view of any datatype the value converts to.
    fn write_buffer(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        let own = self.h5_dtype();
        if view.dtype() == &own {
            return self.write_native(view);
        }
        let mut tmp = H5Buffer::new(own);
        self.write_native(&mut tmp.view_mut())?;
        view.assign(&tmp.view())
    }
}

/// Load a value from a buffer.
pub trait BufferRead: Sized {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self>;
}

/// Run `read` on `view` converted to `target` when the types differ.
pub fn read_as<T, F>(view: &H5BufferConstView<'_>, target: &DType, read: F) -> Result<T>
where
    F: FnOnce(&H5BufferConstView<'_>) -> Result<T>,
{
    if view.dtype() == target {
        read(view)
    } else {
        let converted = convert(view, target)?;
        read(&converted.view())
    }
}

/// A new buffer holding `value` in its own datatype.
pub fn to_buffer<T: BufferWrite + ?Sized>(value: &T) -> Result<H5Buffer> {
    let mut buffer = H5Buffer::new(value.h5_dtype());
    value.write_native(&mut buffer.view_mut())?;
    Ok(buffer)
}

/// A new buffer holding `value` converted to `dtype`.
pub fn to_buffer_as<T: BufferWrite + ?Sized>(value: &T, dtype: DType) -> Result<H5Buffer> {
    let mut buffer = H5Buffer::new(dtype);
    value.write_buffer(&mut buffer.view_mut())?;
    Ok(buffer)
}

pub fn from_buffer<T: BufferRead>(view: &H5BufferConstView<'_>) -> Result<T> {
    T::read_buffer(view)
}

/// Children of an array or sequence buffer, read one by one.
fn read_elements<T: BufferRead>(view: &H5BufferConstView<'_>) -> Result<Vec<T>> {
    match view.dtype().class() {
        DTypeClass::Array | DTypeClass::VarLen => view.iter()?.map(|e| T::read_buffer(&e)).collect(),
        _ => Err(Error::DType(format!(
            "Cannot read elements from {}",
            display(view.dtype())
        ))),
    }
}

impl<T: H5DType + ?Sized> H5DType for &T {
    fn h5_dtype(&self) -> DType {
        (**self).h5_dtype()
    }
}

impl<T: BufferWrite + ?Sized> BufferWrite for &T {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        (**self).write_native(view)
    }
}

// ---- numbers ----

macro_rules! impl_number {
    ($($t:ty => $ctor:ident),* $(,)?) => {$(
        impl H5DType for $t {
            fn h5_dtype(&self) -> DType {
                DType::$ctor()
            }
        }

        impl StaticH5DType for $t {
            fn static_h5_dtype() -> DType {
                DType::$ctor()
            }
        }

        impl BufferWrite for $t {
            fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
                view.bytes_mut().copy_from_slice(&self.to_le_bytes());
                Ok(())
            }
        }

        impl BufferRead for $t {
            fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
                read_as(view, &DType::$ctor(), |v| {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(v.bytes());
                    Ok(<$t>::from_le_bytes(raw))
                })
            }
        }
    )*};
}

impl_number!(
    i8 => native_i8,
    i16 => native_i16,
    i32 => native_i32,
    i64 => native_i64,
    u8 => native_u8,
    u16 => native_u16,
    u32 => native_u32,
    u64 => native_u64,
    f32 => native_f32,
    f64 => native_f64,
);

impl H5DType for bool {
    fn h5_dtype(&self) -> DType {
        DType::native_bool()
    }
}

impl StaticH5DType for bool {
    fn static_h5_dtype() -> DType {
        DType::native_bool()
    }
}

impl BufferWrite for bool {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        view.bytes_mut()[0] = u8::from(*self);
        Ok(())
    }
}

impl BufferRead for bool {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        read_as(view, &DType::native_bool(), |v| Ok(v.bytes()[0] != 0))
    }
}

// ---- bitfields ----

/// Raw bits stored with the HDF5 bitfield class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bitfield<T>(pub T);

macro_rules! impl_bitfield {
    ($($t:ty),*) => {$(
        impl H5DType for Bitfield<$t> {
            fn h5_dtype(&self) -> DType {
                Self::static_h5_dtype()
            }
        }

        impl StaticH5DType for Bitfield<$t> {
            fn static_h5_dtype() -> DType {
                DType::native_bitfield(std::mem::size_of::<$t>() as u32)
            }
        }

        impl BufferWrite for Bitfield<$t> {
            fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
                view.bytes_mut().copy_from_slice(&self.0.to_le_bytes());
                Ok(())
            }
        }

        impl BufferRead for Bitfield<$t> {
            fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
                read_as(view, &Self::static_h5_dtype(), |v| {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(v.bytes());
                    Ok(Bitfield(<$t>::from_le_bytes(raw)))
                })
            }
        }
    )*};
}

impl_bitfield!(u8, u16, u32, u64);

// ---- strings ----

fn write_variable_string(bytes: &[u8], view: &mut H5BufferView<'_>) -> Result<()> {
    let (data, heap) = view.parts_mut();
    let slot = make_slot(heap, bytes.len() as u64, bytes.to_vec());
    data.copy_from_slice(&slot);
    Ok(())
}

fn read_string(view: &H5BufferConstView<'_>) -> Result<String> {
    if view.dtype().is_string() {
        return Ok(view.as_str()?.to_owned());
    }
    read_as(view, &DType::variable_string(), |v| Ok(v.as_str()?.to_owned()))
}

impl H5DType for str {
    fn h5_dtype(&self) -> DType {
        DType::variable_string()
    }
}

impl BufferWrite for str {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        write_variable_string(self.as_bytes(), view)
    }
}

impl H5DType for String {
    fn h5_dtype(&self) -> DType {
        DType::variable_string()
    }
}

impl StaticH5DType for String {
    fn static_h5_dtype() -> DType {
        DType::variable_string()
    }
}

impl BufferWrite for String {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        write_variable_string(self.as_bytes(), view)
    }
}

impl BufferRead for String {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        read_string(view)
    }
}

/// A string stored with the fixed-length string class, sized by its value.
/// Empty strings take one byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FLString(pub String);

impl FLString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FLString {
    fn from(s: &str) -> Self {
        FLString(s.to_owned())
    }
}

impl From<String> for FLString {
    fn from(s: String) -> Self {
        FLString(s)
    }
}

impl Deref for FLString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FLString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl H5DType for FLString {
    fn h5_dtype(&self) -> DType {
        DType::fixed_string(self.0.len().max(1) as u32)
    }
}

impl BufferWrite for FLString {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        let out = view.bytes_mut();
        out.fill(0);
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
        Ok(())
    }
}

impl BufferRead for FLString {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        read_string(view).map(FLString)
    }
}

// ---- arrays and sequences ----

impl<T: StaticH5DType, const N: usize> H5DType for [T; N] {
    fn h5_dtype(&self) -> DType {
        Self::static_h5_dtype()
    }
}

impl<T: StaticH5DType, const N: usize> StaticH5DType for [T; N] {
    fn static_h5_dtype() -> DType {
        DType::array(T::static_h5_dtype(), &[N as u32])
    }
}

impl<T: StaticH5DType + BufferWrite, const N: usize> BufferWrite for [T; N] {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        for (i, value) in self.iter().enumerate() {
            value.write_native(&mut view.element_mut(i)?)?;
        }
        Ok(())
    }
}

impl<T: BufferRead, const N: usize> BufferRead for [T; N] {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        let values = read_elements::<T>(view)?;
        let len = values.len();
        values.try_into().map_err(|_| {
            Error::DType(format!("Cannot read {len} elements into an array of {N}"))
        })
    }
}

impl<T: StaticH5DType> H5DType for Vec<T> {
    fn h5_dtype(&self) -> DType {
        Self::static_h5_dtype()
    }
}

impl<T: StaticH5DType> StaticH5DType for Vec<T> {
    fn static_h5_dtype() -> DType {
        DType::vlen(T::static_h5_dtype())
    }
}

impl<T: StaticH5DType + BufferWrite> BufferWrite for Vec<T> {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        let base = T::static_h5_dtype();
        let size = base.size();
        let mut payload = vec![0u8; size * self.len()];
        let (data, heap) = view.parts_mut();
        for (value, chunk) in self.iter().zip(payload.chunks_exact_mut(size.max(1))) {
            let mut element = H5BufferView::new(&base, &mut chunk[..size], &mut *heap)?;
            value.write_native(&mut element)?;
        }
        let slot = make_slot(heap, self.len() as u64, payload);
        data.copy_from_slice(&slot);
        Ok(())
    }
}

impl<T: BufferRead> BufferRead for Vec<T> {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        read_elements(view)
    }
}

/// A vector stored as an HDF5 array, sized by its value.
///
/// The element type is the common super type of every element, so a
/// vector of [`FLString`]s uses the longest string's length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FLVector<T>(pub Vec<T>);

impl<T> From<Vec<T>> for FLVector<T> {
    fn from(v: Vec<T>) -> Self {
        FLVector(v)
    }
}

impl<T> Deref for FLVector<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T: H5DType + Default> H5DType for FLVector<T> {
    fn h5_dtype(&self) -> DType {
        let dtypes: Vec<DType> = self.0.iter().map(|v| v.h5_dtype()).collect();
        let element = match dtypes.first() {
            None => T::default().h5_dtype(),
            Some(first) => common_dtype(&dtypes).unwrap_or_else(|_| first.clone()),
        };
        DType::array(element, &[self.0.len() as u32])
    }
}

impl<T: BufferWrite + Default> BufferWrite for FLVector<T> {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        for (i, value) in self.0.iter().enumerate() {
            value.write_buffer(&mut view.element_mut(i)?)?;
        }
        Ok(())
    }
}

impl<T: BufferRead> BufferRead for FLVector<T> {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        read_elements(view).map(FLVector)
    }
}

// ---- tuples ----

macro_rules! impl_tuple {
    ($($idx:tt $name:ident),+) => {
        impl<$($name: H5DType),+> H5DType for ($($name,)+) {
            fn h5_dtype(&self) -> DType {
                packed_compound([$((concat!("element", stringify!($idx)), self.$idx.h5_dtype())),+])
            }
        }

        impl<$($name: StaticH5DType),+> StaticH5DType for ($($name,)+) {
            fn static_h5_dtype() -> DType {
                packed_compound([$((concat!("element", stringify!($idx)), $name::static_h5_dtype())),+])
            }
        }

        impl<$($name: BufferWrite),+> BufferWrite for ($($name,)+) {
            fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
                $(self.$idx.write_native(&mut view.member_mut($idx)?)?;)+
                Ok(())
            }
        }

        impl<$($name: BufferRead),+> BufferRead for ($($name,)+) {
            fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
                Ok(($(view.member_named(concat!("element", stringify!($idx)))?.read::<$name>()?,)+))
            }
        }
    };
}

impl_tuple!(0 A);
impl_tuple!(0 A, 1 B);
impl_tuple!(0 A, 1 B, 2 C);
impl_tuple!(0 A, 1 B, 2 C, 3 D);
impl_tuple!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

// ---- buffers ----

impl H5DType for H5Buffer {
    fn h5_dtype(&self) -> DType {
        self.dtype().clone()
    }
}

impl BufferWrite for H5Buffer {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        view.assign(&self.view())
    }
}

impl BufferRead for H5Buffer {
    fn read_buffer(view: &H5BufferConstView<'_>) -> Result<Self> {
        view.to_buffer()
    }
}

impl H5DType for H5BufferConstView<'_> {
    fn h5_dtype(&self) -> DType {
        self.dtype().clone()
    }
}

impl BufferWrite for H5BufferConstView<'_> {
    fn write_native(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        view.assign(self)
    }

    fn write_buffer(&self, view: &mut H5BufferView<'_>) -> Result<()> {
        view.assign(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_convert_on_read() {
        let buf = to_buffer(&300i32).unwrap();
        assert_eq!(buf.view().read::<i32>().unwrap(), 300);
        assert_eq!(buf.view().read::<f64>().unwrap(), 300.0);
        // clamped into the narrower type
        assert_eq!(buf.view().read::<u8>().unwrap(), 255);
        assert!(buf.view().read::<bool>().unwrap());
    }

    #[test]
    fn write_into_other_type() {
        let buf = to_buffer_as(&2.75f64, DType::native_i16()).unwrap();
        assert_eq!(buf.dtype(), &DType::native_i16());
        assert_eq!(buf.view().read::<i16>().unwrap(), 2);
        assert!(to_buffer_as(&1u8, DType::variable_string()).is_err());
    }

    #[test]
    fn fixed_length_strings() {
        let s = FLString::from("hello");
        assert_eq!(s.h5_dtype(), DType::fixed_string(5));
        assert_eq!(FLString::default().h5_dtype(), DType::fixed_string(1));
        let buf = to_buffer(&s).unwrap();
        assert_eq!(buf.bytes(), b"hello");
        assert_eq!(buf.view().read::<String>().unwrap(), "hello");
        let wide = to_buffer_as(&s, DType::fixed_string(8)).unwrap();
        assert_eq!(wide.view().read::<FLString>().unwrap(), s);
        let var = to_buffer_as(&s, DType::variable_string()).unwrap();
        assert_eq!(var.view().read::<String>().unwrap(), "hello");
    }

    #[test]
    fn sequences_and_arrays() {
        let v = vec![vec![1u8, 2], vec![], vec![3]];
        let buf = to_buffer(&v).unwrap();
        assert_eq!(buf.dtype(), &DType::vlen(DType::vlen(DType::native_u8())));
        assert_eq!(buf.view().read::<Vec<Vec<u8>>>().unwrap(), v);

        let a = [[1.5f32, 2.5], [3.5, 4.5]];
        let buf = to_buffer(&a).unwrap();
        assert_eq!(buf.dtype().size(), 16);
        assert_eq!(buf.view().read::<[[f32; 2]; 2]>().unwrap(), a);
        assert_eq!(buf.view().read::<Vec<[f64; 2]>>().unwrap(), [[1.5, 2.5], [3.5, 4.5]]);
        assert!(buf.view().read::<[[f32; 2]; 3]>().is_err());
    }

    #[test]
    fn fixed_length_vectors_share_element_type() {
        let names = FLVector(vec![FLString::from("a"), FLString::from("abc")]);
        let dt = names.h5_dtype();
        assert_eq!(dt, DType::array(DType::fixed_string(3), &[2]));
        let buf = to_buffer(&names).unwrap();
        assert_eq!(buf.bytes(), b"a\0\0abc");
        let back: FLVector<FLString> = buf.view().read().unwrap();
        assert_eq!(back, names);
    }

    #[test]
    fn tuples_are_compounds() {
        let value = (1u8, String::from("x"), [true, false]);
        let dt = value.h5_dtype();
        assert_eq!(dt.member_names(), ["element0", "element1", "element2"]);
        assert_eq!(dt, <(u8, String, [bool; 2])>::static_h5_dtype());
        let buf = to_buffer(&value).unwrap();
        assert_eq!(buf.view().read::<(u8, String, [bool; 2])>().unwrap(), value);
        // members matched by name, the rest converted
        let (a, b): (f32, FLString) = buf.view().read().unwrap();
        assert_eq!((a, b.as_str()), (1.0, "x"));
    }

    #[test]
    fn bitfields() {
        let buf = to_buffer(&Bitfield(0xA5u8)).unwrap();
        assert_eq!(buf.dtype(), &DType::native_bitfield(1));
        assert_eq!(buf.view().read::<Bitfield<u16>>().unwrap(), Bitfield(0xA5));
        assert!(buf.view().read::<u8>().is_err());
    }
}

//! Memory descriptors and the dual-precision buffer pair.
//!
//! Every logical tensor exists twice: a [`RefBuffer`] holding ground truth in
//! `f32` with a plain row-major layout, and a [`WorkBuffer`] in the working
//! precision and layout the engine computes with. The only way to move data
//! between them is an explicit reorder, which is where precision is lost.

use half::{bf16, f16};

use crate::error::{DnnCheckError, Result};
use crate::types::DataType;

// ── Format tags ────────────────────────────────────────────────────

/// Resolve a format tag into a dimension order, outermost first.
///
/// Accepted spellings:
/// - `abx`, `x`, `any`: plain row-major
/// - `axb`: channels last (`a`, spatial dims, then `b`)
/// - an explicit permutation of the first `ndims` letters, e.g. `bac`
pub fn parse_tag(tag: &str, ndims: usize) -> Result<Vec<usize>> {
    let invalid = || DnnCheckError::InvalidTag { tag: tag.to_string(), ndims };
    match tag {
        "abx" | "x" | "any" => return Ok((0..ndims).collect()),
        "axb" => {
            if ndims < 2 {
                return Ok((0..ndims).collect());
            }
            let mut order = vec![0];
            order.extend(2..ndims);
            order.push(1);
            return Ok(order);
        }
        _ => {}
    }

    if tag.len() != ndims {
        return Err(invalid());
    }
    let mut seen = vec![false; ndims];
    let mut order = Vec::with_capacity(ndims);
    for ch in tag.chars() {
        if !ch.is_ascii_lowercase() {
            return Err(invalid());
        }
        let dim = (ch as u8 - b'a') as usize;
        if dim >= ndims || seen[dim] {
            return Err(invalid());
        }
        seen[dim] = true;
        order.push(dim);
    }
    Ok(order)
}

// ── Memory descriptor ──────────────────────────────────────────────

/// Dense tensor description: logical dims, element type and physical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDesc {
    dims: Vec<usize>,
    dt: DataType,
    order: Vec<usize>,
    strides: Vec<usize>,
}

impl MemoryDesc {
    /// Plain row-major descriptor.
    pub fn new(dims: &[usize], dt: DataType) -> Self {
        let order: Vec<usize> = (0..dims.len()).collect();
        let strides = strides_for(dims, &order);
        Self { dims: dims.to_vec(), dt, order, strides }
    }

    pub fn from_tag(dims: &[usize], dt: DataType, tag: &str) -> Result<Self> {
        let order = parse_tag(tag, dims.len())?;
        let strides = strides_for(dims, &order);
        Ok(Self { dims: dims.to_vec(), dt, order, strides })
    }

    /// Same layout, different element type.
    pub fn with_dt(&self, dt: DataType) -> Self {
        Self { dt, ..self.clone() }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dt(&self) -> DataType {
        self.dt
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    pub fn nelems(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn size_bytes(&self) -> usize {
        self.nelems() * self.dt.size_of()
    }

    pub fn is_plain(&self) -> bool {
        self.order.iter().enumerate().all(|(i, &d)| i == d)
    }

    /// Format tag spelled as a letter permutation.
    pub fn tag(&self) -> String {
        self.order.iter().map(|&d| (b'a' + d as u8) as char).collect()
    }

    /// Physical offset of the element at row-major logical index `logical`.
    pub fn off_l(&self, logical: usize) -> usize {
        let mut rem = logical;
        let mut off = 0;
        for d in (0..self.dims.len()).rev() {
            let dim = self.dims[d];
            if dim == 0 {
                return 0;
            }
            off += (rem % dim) * self.strides[d];
            rem /= dim;
        }
        off
    }
}

fn strides_for(dims: &[usize], order: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1;
    for &d in order.iter().rev() {
        strides[d] = acc;
        acc *= dims[d].max(1);
    }
    strides
}

// ── Reference buffer ───────────────────────────────────────────────

/// Ground-truth tensor: `f32`, plain layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RefBuffer {
    dims: Vec<usize>,
    data: Vec<f32>,
}

impl RefBuffer {
    pub fn new(dims: &[usize]) -> Self {
        Self { dims: dims.to_vec(), data: vec![0.0; dims.iter().product()] }
    }

    pub fn from_vec(dims: &[usize], data: Vec<f32>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(DnnCheckError::Shape { expected: dims.to_vec(), actual: vec![data.len()] });
        }
        Ok(Self { dims: dims.to_vec(), data })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn nelems(&self) -> usize {
        self.data.len()
    }

    pub fn desc(&self) -> MemoryDesc {
        MemoryDesc::new(&self.dims, DataType::F32)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, idx: usize) -> f32 {
        self.data[idx]
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: f32) {
        self.data[idx] = value;
    }
}

// ── Working buffer ─────────────────────────────────────────────────

/// Typed element storage of a [`WorkBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    Bf16(Vec<bf16>),
    F16(Vec<f16>),
    S32(Vec<i32>),
    S8(Vec<i8>),
    U8(Vec<u8>),
}

impl Storage {
    fn zeros(dt: DataType, len: usize) -> Self {
        match dt {
            DataType::F32 => Storage::F32(vec![0.0; len]),
            DataType::Bf16 => Storage::Bf16(vec![bf16::ZERO; len]),
            DataType::F16 => Storage::F16(vec![f16::ZERO; len]),
            DataType::S32 => Storage::S32(vec![0; len]),
            DataType::S8 => Storage::S8(vec![0; len]),
            DataType::U8 => Storage::U8(vec![0; len]),
        }
    }

    fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::Bf16(v) => v.len(),
            Storage::F16(v) => v.len(),
            Storage::S32(v) => v.len(),
            Storage::S8(v) => v.len(),
            Storage::U8(v) => v.len(),
        }
    }
}

/// Tensor in working precision and layout.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkBuffer {
    desc: MemoryDesc,
    storage: Storage,
}

impl WorkBuffer {
    pub fn new(desc: &MemoryDesc) -> Self {
        Self { storage: Storage::zeros(desc.dt(), desc.nelems()), desc: desc.clone() }
    }

    /// Allocate a buffer for `desc` and reorder `src` into it.
    pub fn from_ref(desc: &MemoryDesc, src: &RefBuffer) -> Result<Self> {
        let mut buf = Self::new(desc);
        buf.reorder_from(src)?;
        Ok(buf)
    }

    pub fn desc(&self) -> &MemoryDesc {
        &self.desc
    }

    pub fn dt(&self) -> DataType {
        self.desc.dt()
    }

    pub fn nelems(&self) -> usize {
        self.storage.len()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Read the element at physical offset `off`, widened to `f32`.
    #[inline]
    pub fn get_f32(&self, off: usize) -> f32 {
        match &self.storage {
            Storage::F32(v) => v[off],
            Storage::Bf16(v) => v[off].to_f32(),
            Storage::F16(v) => v[off].to_f32(),
            Storage::S32(v) => v[off] as f32,
            Storage::S8(v) => v[off] as f32,
            Storage::U8(v) => v[off] as f32,
        }
    }

    /// Store `value` at physical offset `off`, rounding and saturating to
    /// the working type.
    #[inline]
    pub fn set_f32(&mut self, off: usize, value: f32) {
        let dt = self.desc.dt();
        match &mut self.storage {
            Storage::F32(v) => v[off] = value,
            Storage::Bf16(v) => v[off] = bf16::from_f32(value),
            Storage::F16(v) => v[off] = f16::from_f32(value),
            Storage::S32(v) => v[off] = dt.round_to_representable(value) as i32,
            Storage::S8(v) => v[off] = dt.round_to_representable(value) as i8,
            Storage::U8(v) => v[off] = dt.round_to_representable(value) as u8,
        }
    }

    #[inline]
    pub fn get_logical(&self, idx: usize) -> f32 {
        self.get_f32(self.desc.off_l(idx))
    }

    #[inline]
    pub fn set_logical(&mut self, idx: usize, value: f32) {
        let off = self.desc.off_l(idx);
        self.set_f32(off, value);
    }

    /// Lossy conversion from the reference format into this buffer.
    pub fn reorder_from(&mut self, src: &RefBuffer) -> Result<()> {
        if src.dims() != self.desc.dims() {
            return Err(DnnCheckError::Shape {
                expected: self.desc.dims().to_vec(),
                actual: src.dims().to_vec(),
            });
        }
        for (idx, &value) in src.as_slice().iter().enumerate() {
            self.set_logical(idx, value);
        }
        Ok(())
    }

    /// Overwrite this buffer from logical-order `f32` values.
    pub fn write_logical(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.nelems() {
            return Err(DnnCheckError::Shape {
                expected: vec![self.nelems()],
                actual: vec![values.len()],
            });
        }
        for (idx, &value) in values.iter().enumerate() {
            self.set_logical(idx, value);
        }
        Ok(())
    }

    /// Logical-order `f32` copy of the contents.
    pub fn to_f32_logical(&self) -> Vec<f32> {
        (0..self.nelems()).map(|idx| self.get_logical(idx)).collect()
    }

    /// Widen into a reference-format buffer. Exact for every working type.
    pub fn to_ref(&self) -> RefBuffer {
        RefBuffer { dims: self.desc.dims().to_vec(), data: self.to_f32_logical() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_tag_is_row_major() {
        let md = MemoryDesc::from_tag(&[2, 3, 4], DataType::F32, "abx").unwrap();
        assert_eq!(md.strides(), &[12, 4, 1]);
        assert!(md.is_plain());
        assert_eq!(md.off_l(13), 13);
    }

    #[test]
    fn channels_last_moves_b_innermost() {
        let md = MemoryDesc::from_tag(&[2, 3, 4], DataType::F32, "axb").unwrap();
        assert_eq!(md.tag(), "acb");
        assert_eq!(md.strides(), &[12, 1, 3]);
        // logical (0, 1, 0) lives right after (0, 0, 0)
        assert_eq!(md.off_l(4), 1);
    }

    #[test]
    fn explicit_tags_are_validated() {
        assert!(MemoryDesc::from_tag(&[2, 3], DataType::F32, "ba").is_ok());
        assert!(MemoryDesc::from_tag(&[2, 3], DataType::F32, "aa").is_err());
        assert!(MemoryDesc::from_tag(&[2, 3], DataType::F32, "abc").is_err());
        assert!(MemoryDesc::from_tag(&[2, 3], DataType::F32, "a1").is_err());
    }

    #[test]
    fn reorder_through_permuted_layout_preserves_logical_order() {
        let src = RefBuffer::from_vec(&[2, 3], (0..6).map(|v| v as f32).collect()).unwrap();
        let md = MemoryDesc::from_tag(&[2, 3], DataType::F32, "ba").unwrap();
        let work = WorkBuffer::from_ref(&md, &src).unwrap();
        match work.storage() {
            Storage::F32(v) => assert_eq!(v, &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]),
            other => panic!("unexpected storage {other:?}"),
        }
        assert_eq!(work.to_ref(), src);
    }

    #[test]
    fn reorder_to_bf16_is_lossy() {
        let src = RefBuffer::from_vec(&[2], vec![1.0 + 1.0 / 1024.0, 3.0]).unwrap();
        let md = MemoryDesc::new(&[2], DataType::Bf16);
        let work = WorkBuffer::from_ref(&md, &src).unwrap();
        assert_eq!(work.to_ref().as_slice(), &[1.0, 3.0]);
    }

    #[test]
    fn reorder_rejects_shape_mismatch() {
        let src = RefBuffer::new(&[4]);
        let mut work = WorkBuffer::new(&MemoryDesc::new(&[2, 2], DataType::F32));
        assert!(work.reorder_from(&src).is_err());
    }

    #[test]
    fn empty_buffers_are_allowed() {
        let work = WorkBuffer::new(&MemoryDesc::new(&[0], DataType::F32));
        assert_eq!(work.nelems(), 0);
        assert!(work.to_ref().as_slice().is_empty());
    }
    fn shape_and_tag() -> impl Strategy<Value = (Vec<usize>, String)> {
        prop::collection::vec(1usize..5, 1..5).prop_flat_map(|dims| {
            let order: Vec<usize> = (0..dims.len()).collect();
            (Just(dims), Just(order).prop_shuffle())
        })
        .prop_map(|(dims, order)| {
            let tag = order.iter().map(|&d| (b'a' + d as u8) as char).collect();
            (dims, tag)
        })
    }

    proptest! {
        #[test]
        fn representable_values_survive_any_reorder(
            (dims, tag) in shape_and_tag(),
            dt_idx in 0usize..DataType::ALL.len(),
            seed in prop::collection::vec(-300.0f32..300.0, 256),
        ) {
            let dt = DataType::ALL[dt_idx];
            let n: usize = dims.iter().product();
            let values: Vec<f32> = seed.iter().take(n).map(|&v| dt.round_to_representable(v)).collect();
            let src = RefBuffer::from_vec(&dims, values).unwrap();
            let md = MemoryDesc::from_tag(&dims, dt, &tag).unwrap();
            let work = WorkBuffer::from_ref(&md, &src).unwrap();
            prop_assert_eq!(work.to_ref(), src);
        }
    }
}

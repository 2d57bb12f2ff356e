//! The multi-frame container: compressed payloads, per-frame metadata,
//! and the streaming read/write surface.
//!
//! All frames of a container share one value count, signedness and
//! block size, fixed by the first frame inserted. A container bound to
//! a worker pool backgrounds the encode of owned frames; the slot holds
//! the pending task until something reads it, at which point the task
//! is forced and the payload stored. Everything observable is identical
//! with or without a pool.

use std::io::{BufRead, Read, Write};

use log::debug;
use rayon::prelude::*;

use crate::decode::{decode_frame, measure_payload};
use crate::encode::encode_frame;
use crate::error::TrpxError;
use crate::header::WireHeader;
use crate::pool::{Parallelism, Task, Workers};
use crate::sample::{Mode, Sample};

const DEFAULT_BLOCK: usize = 12;
const MIN_BLOCK: usize = 8;
const MAX_BLOCK: usize = 64;

enum FrameSlot {
    Ready(Vec<u8>),
    Pending(Task<Vec<u8>>),
}

/// A stack of compressed frames with shared shape.
///
/// `Terse` is the compressed ("terse") form; [`Terse::prolix`] and
/// friends materialize the decompressed ("prolix") values. Frames are
/// kept as independent payloads, so single frames can be extracted,
/// erased or decoded without touching the others.
pub struct Terse {
    frames: Vec<FrameSlot>,
    metadata: Vec<String>,
    signed: bool,
    small: bool,
    block: usize,
    size: usize,
    prolix_bits: u32,
    dim: Vec<usize>,
    workers: Option<Workers>,
}

impl Default for Terse {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Terse {
    /// Outstanding encodes run to completion; dropping the container
    /// waits for them rather than orphaning the workers mid-frame.
    fn drop(&mut self) {
        for slot in &mut self.frames {
            if matches!(slot, FrameSlot::Pending(_)) {
                let pending = std::mem::replace(slot, FrameSlot::Ready(Vec::new()));
                if let FrameSlot::Pending(task) = pending {
                    let _ = task.wait();
                }
            }
        }
    }
}

impl Terse {
    /// Empty container. The first frame inserted fixes the value count
    /// and signedness of all later frames.
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            metadata: Vec::new(),
            signed: false,
            small: false,
            block: DEFAULT_BLOCK,
            size: 0,
            prolix_bits: 0,
            dim: Vec::new(),
            workers: None,
        }
    }

    /// Empty container whose owned-frame encodes and bulk decodes run
    /// on a worker pool sized by `dop`.
    pub fn with_parallelism(dop: Parallelism) -> Result<Self, TrpxError> {
        let mut t = Self::new();
        t.set_parallelism(dop)?;
        Ok(t)
    }

    /// Rebind the worker pool. Outstanding encodes are forced first.
    pub fn set_parallelism(&mut self, dop: Parallelism) -> Result<(), TrpxError> {
        self.force_all()?;
        self.workers = if dop.fraction() > 0.0 {
            Some(Workers::new(dop)?)
        } else {
            None
        };
        Ok(())
    }

    /// Current degree of parallelism; zero when unbound.
    pub fn dop(&self) -> Parallelism {
        self.workers
            .as_ref()
            .map(|w| w.dop())
            .unwrap_or(Parallelism::new(0.0))
    }

    /// Values per frame.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn number_of_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True if the frames hold signed values. Signed frames cannot be
    /// unpacked into unsigned destinations.
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Bit depth of the widest value type inserted so far.
    pub fn bits_per_val(&self) -> u32 {
        self.prolix_bits
    }

    /// Block size used for encoding.
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Change the block size; only an empty container accepts this.
    pub fn set_block_size(&mut self, block: usize) -> Result<(), TrpxError> {
        if !(MIN_BLOCK..=MAX_BLOCK).contains(&block) {
            return Err(TrpxError::BlockSize(block));
        }
        if !self.frames.is_empty() {
            return Err(TrpxError::BlockSize(self.block));
        }
        self.block = block;
        Ok(())
    }

    /// Whether `Mode::Auto` resolves unsigned data to the
    /// small-unsigned encoding instead of the plain unsigned one.
    pub fn small(&self) -> bool {
        self.small
    }

    pub fn set_small(&mut self, small: bool) {
        self.small = small;
    }

    /// Per-frame dimensions, empty when unset.
    pub fn dim(&self) -> &[usize] {
        &self.dim
    }

    /// Set the per-frame dimensions. Accepted while the container is
    /// empty or when their product matches the value count.
    pub fn set_dim(&mut self, dim: Vec<usize>) -> Result<(), TrpxError> {
        if dim.iter().any(|&d| d == 0) {
            return Err(TrpxError::DimMismatch {
                dims: dim,
                size: self.size,
            });
        }
        if self.frames.is_empty() || dim.iter().product::<usize>() == self.size {
            self.dim = dim;
            Ok(())
        } else {
            Err(TrpxError::DimMismatch {
                dims: dim,
                size: self.size,
            })
        }
    }

    /// Compress `data` and splice it in as frame `pos`, with an empty
    /// metadata string. The encode runs synchronously.
    pub fn insert<T: Sample>(&mut self, pos: usize, data: &[T], mode: Mode) -> Result<(), TrpxError> {
        let mode = self.validate_insert::<T>(pos, data.len(), mode)?;
        let payload = encode_frame(data, self.block, mode);
        self.metadata.insert(pos, String::new());
        self.frames.insert(pos, FrameSlot::Ready(payload));
        Ok(())
    }

    /// As [`Terse::insert`], but consuming the data. With a worker pool
    /// bound the encode is backgrounded and the slot holds a pending
    /// task until first read.
    pub fn insert_owned<T: Sample>(
        &mut self,
        pos: usize,
        data: Vec<T>,
        mode: Mode,
    ) -> Result<(), TrpxError> {
        let mode = self.validate_insert::<T>(pos, data.len(), mode)?;
        let block = self.block;
        let slot = match &self.workers {
            Some(w) => FrameSlot::Pending(w.submit(move || encode_frame(&data, block, mode))),
            None => FrameSlot::Ready(encode_frame(&data, block, mode)),
        };
        self.metadata.insert(pos, String::new());
        self.frames.insert(pos, slot);
        Ok(())
    }

    pub fn push_back<T: Sample>(&mut self, data: &[T], mode: Mode) -> Result<(), TrpxError> {
        self.insert(self.frames.len(), data, mode)
    }

    pub fn push_back_owned<T: Sample>(&mut self, data: Vec<T>, mode: Mode) -> Result<(), TrpxError> {
        self.insert_owned(self.frames.len(), data, mode)
    }

    /// Splice every frame of `other` in at `pos`. Shapes, signedness,
    /// block size and dimensions must agree; an empty container adopts
    /// them from `other`.
    pub fn insert_frames(&mut self, pos: usize, mut other: Terse) -> Result<(), TrpxError> {
        if pos > self.frames.len() {
            return Err(TrpxError::IndexOutOfRange {
                index: pos,
                len: self.frames.len(),
            });
        }
        if self.frames.is_empty() {
            self.signed = other.signed;
            self.block = other.block;
            self.size = other.size;
            self.dim = other.dim.clone();
        } else if !other.frames.is_empty() {
            if other.signed != self.signed {
                return Err(TrpxError::SignednessMismatch);
            }
            if other.size != self.size {
                return Err(TrpxError::ShapeMismatch {
                    expected: self.size,
                    got: other.size,
                });
            }
            if other.block != self.block {
                return Err(TrpxError::BlockSize(other.block));
            }
            if other.dim != self.dim {
                return Err(TrpxError::DimMismatch {
                    dims: other.dim.clone(),
                    size: self.size,
                });
            }
        }
        self.prolix_bits = self.prolix_bits.max(other.prolix_bits);
        self.force_all()?;
        other.force_all()?;
        let payloads: Vec<FrameSlot> = other.frames.drain(..).collect();
        self.frames.splice(pos..pos, payloads);
        self.metadata.splice(pos..pos, other.metadata.drain(..));
        Ok(())
    }

    pub fn push_back_frames(&mut self, other: Terse) -> Result<(), TrpxError> {
        self.insert_frames(self.frames.len(), other)
    }

    /// Remove frame `pos` and its metadata. Outstanding encodes are
    /// forced first so later indices stay meaningful.
    pub fn erase(&mut self, pos: usize) -> Result<(), TrpxError> {
        self.check_index(pos)?;
        self.force_all()?;
        self.frames.remove(pos);
        self.metadata.remove(pos);
        Ok(())
    }

    /// Frame `pos` as a single-frame container sharing shape, mode
    /// defaults and metadata.
    pub fn at(&mut self, pos: usize) -> Result<Terse, TrpxError> {
        self.check_index(pos)?;
        let payload = self.force(pos)?.to_vec();
        Ok(Terse {
            frames: vec![FrameSlot::Ready(payload)],
            metadata: vec![self.metadata[pos].clone()],
            signed: self.signed,
            small: self.small,
            block: self.block,
            size: self.size,
            prolix_bits: self.prolix_bits,
            dim: self.dim.clone(),
            workers: None,
        })
    }

    /// Decode frame `pos` into `out`, which must hold exactly
    /// [`Terse::size`] values.
    ///
    /// Unsigned frames may be unpacked into a signed destination of the
    /// same or greater width; an all-ones overload then comes back as
    /// `-1`, the bit pattern it was stored with.
    pub fn prolix<T: Sample>(&mut self, out: &mut [T], pos: usize) -> Result<(), TrpxError> {
        self.check_index(pos)?;
        self.check_destination::<T>()?;
        if out.len() != self.size {
            return Err(TrpxError::ShapeMismatch {
                expected: self.size,
                got: out.len(),
            });
        }
        let block = self.block;
        let prolix_bits = self.prolix_bits;
        let signed = self.signed;
        let payload = self.force(pos)?;
        decode_frame(payload, out, block, prolix_bits, signed)
    }

    /// Decode every frame, consecutively, into `out`. With a worker
    /// pool bound the frames are decoded in parallel.
    pub fn prolix_all<T: Sample>(&mut self, out: &mut [T]) -> Result<(), TrpxError> {
        self.check_destination::<T>()?;
        let expected = self.size * self.frames.len();
        if out.len() != expected {
            return Err(TrpxError::ShapeMismatch {
                expected,
                got: out.len(),
            });
        }
        if self.frames.is_empty() || self.size == 0 {
            return Ok(());
        }
        self.force_all()?;
        let size = self.size;
        let block = self.block;
        let prolix_bits = self.prolix_bits;
        let signed = self.signed;
        let mut payloads = Vec::with_capacity(self.frames.len());
        for i in 0..self.frames.len() {
            payloads.push(self.ready_payload(i)?);
        }
        match &self.workers {
            None => {
                for (payload, chunk) in payloads.iter().zip(out.chunks_mut(size)) {
                    decode_frame(payload, chunk, block, prolix_bits, signed)?;
                }
                Ok(())
            }
            Some(w) => w.pool().install(|| {
                payloads
                    .par_iter()
                    .zip(out.par_chunks_mut(size))
                    .try_for_each(|(payload, chunk)| {
                        decode_frame(payload, chunk, block, prolix_bits, signed)
                    })
            }),
        }
    }

    /// Decode every frame into a fresh vector.
    pub fn prolix_to_vec<T: Sample>(&mut self) -> Result<Vec<T>, TrpxError> {
        let mut out = vec![T::ZERO; self.size * self.frames.len()];
        self.prolix_all(&mut out)?;
        Ok(out)
    }

    pub fn metadata(&self, pos: usize) -> Result<&str, TrpxError> {
        self.check_index(pos)?;
        Ok(&self.metadata[pos])
    }

    /// Attach a metadata string to frame `pos`. Metadata is stored
    /// uncompressed and travels with the serialized container.
    pub fn set_metadata(&mut self, pos: usize, data: impl Into<String>) -> Result<(), TrpxError> {
        self.check_index(pos)?;
        self.metadata[pos] = data.into();
        Ok(())
    }

    /// Compressed payload of frame `pos`, forcing a pending encode.
    pub fn frame_bytes(&mut self, pos: usize) -> Result<&[u8], TrpxError> {
        self.check_index(pos)?;
        self.force(pos)
    }

    /// Sum of the payload byte lengths.
    pub fn terse_size(&mut self) -> Result<usize, TrpxError> {
        self.force_all()?;
        let mut total = 0;
        for i in 0..self.frames.len() {
            total += self.ready_payload(i)?.len();
        }
        Ok(total)
    }

    /// Byte length a serialized form of this container would have.
    pub fn file_size(&mut self) -> Result<usize, TrpxError> {
        if self.frames.is_empty() {
            return Ok(0);
        }
        let header = self.build_wire_header()?;
        let metadata: usize = self.metadata.iter().map(|m| m.len()).sum();
        Ok(header.wire_len() + metadata + header.memory_size)
    }

    /// Force all outstanding encodes and drop excess payload capacity.
    pub fn shrink_to_fit(&mut self) -> Result<(), TrpxError> {
        self.force_all()?;
        for slot in &mut self.frames {
            if let FrameSlot::Ready(payload) = slot {
                payload.shrink_to_fit();
            }
        }
        Ok(())
    }

    /// Serialize the container: prelude element, metadata strings, then
    /// the payloads unchanged. An empty container writes nothing.
    pub fn write<W: Write>(&mut self, out: &mut W) -> Result<(), TrpxError> {
        if self.frames.is_empty() {
            return Ok(());
        }
        let header = self.build_wire_header()?;
        header.write_to(out)?;
        for meta in &self.metadata {
            out.write_all(meta.as_bytes())?;
        }
        for i in 0..self.frames.len() {
            let payload = self.ready_payload(i)?;
            out.write_all(payload)?;
        }
        out.flush()?;
        debug!(
            "wrote container: {} frames, {} payload bytes",
            header.number_of_frames, header.memory_size
        );
        Ok(())
    }

    /// Parse a container from `input`, which is scanned for the prelude
    /// element. Fails if the stream ends before one is found.
    pub fn read<R: BufRead>(input: &mut R) -> Result<Terse, TrpxError> {
        Terse::read_opt(input)?
            .ok_or_else(|| TrpxError::Header("stream holds no container".into()))
    }

    /// As [`Terse::read`], returning `None` on a stream without a
    /// container prelude.
    pub fn read_opt<R: BufRead>(input: &mut R) -> Result<Option<Terse>, TrpxError> {
        let Some(header) = WireHeader::read_from(input)? else {
            return Ok(None);
        };
        if header.block == 0 {
            return Err(TrpxError::Header("block attribute is zero".into()));
        }
        let metadata = match &header.metadata_sizes {
            Some(sizes) => {
                if sizes.len() != header.number_of_frames {
                    return Err(TrpxError::Header(format!(
                        "{} metadata sizes for {} frames",
                        sizes.len(),
                        header.number_of_frames
                    )));
                }
                let mut metadata = Vec::with_capacity(sizes.len());
                for &len in sizes {
                    let mut raw = vec![0u8; len];
                    input.read_exact(&mut raw)?;
                    metadata.push(String::from_utf8(raw).map_err(|_| {
                        TrpxError::Header("metadata string is not UTF-8".into())
                    })?);
                }
                metadata
            }
            None => vec![String::new(); header.number_of_frames],
        };
        let frames = match &header.frame_sizes {
            Some(sizes) => {
                if sizes.len() != header.number_of_frames {
                    return Err(TrpxError::Header(format!(
                        "{} frame sizes for {} frames",
                        sizes.len(),
                        header.number_of_frames
                    )));
                }
                if sizes.iter().sum::<usize>() != header.memory_size {
                    return Err(TrpxError::Header(
                        "frame sizes do not sum to memory_size".into(),
                    ));
                }
                let mut frames = Vec::with_capacity(sizes.len());
                for &len in sizes {
                    let mut payload = vec![0u8; len];
                    input.read_exact(&mut payload)?;
                    frames.push(FrameSlot::Ready(payload));
                }
                frames
            }
            None => {
                // Legacy streams: one concatenated blob, cut into frames
                // by re-parsing each payload's block structure.
                let mut blob = vec![0u8; header.memory_size];
                input.read_exact(&mut blob)?;
                let mut frames = Vec::with_capacity(header.number_of_frames);
                let mut offset = 0;
                for _ in 0..header.number_of_frames {
                    let used = measure_payload(
                        &blob[offset..],
                        header.number_of_values,
                        header.block,
                        header.prolix_bits,
                        header.signed,
                    )?;
                    frames.push(FrameSlot::Ready(blob[offset..offset + used].to_vec()));
                    offset += used;
                }
                if offset != blob.len() {
                    return Err(TrpxError::Corrupt(format!(
                        "payloads span {offset} bytes, memory_size says {}",
                        blob.len()
                    )));
                }
                frames
            }
        };
        debug!(
            "read container: {} frames of {} values",
            header.number_of_frames, header.number_of_values
        );
        Ok(Some(Terse {
            frames,
            metadata,
            signed: header.signed,
            small: false,
            block: header.block,
            size: header.number_of_values,
            prolix_bits: header.prolix_bits,
            dim: header.dimensions,
            workers: None,
        }))
    }

    fn build_wire_header(&mut self) -> Result<WireHeader, TrpxError> {
        self.force_all()?;
        let mut frame_sizes = Vec::with_capacity(self.frames.len());
        for i in 0..self.frames.len() {
            frame_sizes.push(self.ready_payload(i)?.len());
        }
        Ok(WireHeader {
            prolix_bits: self.prolix_bits,
            signed: self.signed,
            block: self.block,
            number_of_values: self.size,
            dimensions: self.dim.clone(),
            number_of_frames: self.frames.len(),
            memory_size: frame_sizes.iter().sum(),
            frame_sizes: Some(frame_sizes),
            metadata_sizes: if self.metadata.is_empty() {
                None
            } else {
                Some(self.metadata.iter().map(|m| m.len()).collect())
            },
        })
    }

    fn validate_insert<T: Sample>(
        &mut self,
        pos: usize,
        count: usize,
        mode: Mode,
    ) -> Result<Mode, TrpxError> {
        if pos > self.frames.len() {
            return Err(TrpxError::IndexOutOfRange {
                index: pos,
                len: self.frames.len(),
            });
        }
        let resolved = if T::SIGNED {
            match mode {
                Mode::Signed | Mode::Auto => Mode::Signed,
                Mode::Unsigned | Mode::SmallUnsigned => return Err(TrpxError::ModeConflict),
            }
        } else {
            match mode {
                Mode::Auto => {
                    if self.small {
                        Mode::SmallUnsigned
                    } else {
                        Mode::Unsigned
                    }
                }
                m => m,
            }
        };
        if self.frames.is_empty() {
            self.size = count;
            self.signed = T::SIGNED;
        } else {
            if count != self.size {
                return Err(TrpxError::ShapeMismatch {
                    expected: self.size,
                    got: count,
                });
            }
            if T::SIGNED != self.signed {
                return Err(TrpxError::SignednessMismatch);
            }
        }
        self.prolix_bits = self.prolix_bits.max(T::BITS);
        Ok(resolved)
    }

    fn check_index(&self, pos: usize) -> Result<(), TrpxError> {
        if pos >= self.frames.len() {
            Err(TrpxError::IndexOutOfRange {
                index: pos,
                len: self.frames.len(),
            })
        } else {
            Ok(())
        }
    }

    fn check_destination<T: Sample>(&self) -> Result<(), TrpxError> {
        if self.signed && !T::SIGNED {
            return Err(TrpxError::SignednessMismatch);
        }
        if T::BITS < self.prolix_bits {
            return Err(TrpxError::NarrowingPop {
                stored: self.prolix_bits,
                dest: T::BITS,
            });
        }
        Ok(())
    }

    /// Force a pending encode in place and return the payload.
    fn force(&mut self, pos: usize) -> Result<&[u8], TrpxError> {
        if matches!(self.frames[pos], FrameSlot::Pending(_)) {
            let slot = std::mem::replace(&mut self.frames[pos], FrameSlot::Ready(Vec::new()));
            let payload = match slot {
                FrameSlot::Pending(task) => task.wait()?,
                FrameSlot::Ready(payload) => payload,
            };
            self.frames[pos] = FrameSlot::Ready(payload);
        }
        self.ready_payload(pos)
    }

    fn force_all(&mut self) -> Result<(), TrpxError> {
        for i in 0..self.frames.len() {
            self.force(i)?;
        }
        Ok(())
    }

    fn ready_payload(&self, pos: usize) -> Result<&[u8], TrpxError> {
        match &self.frames[pos] {
            FrameSlot::Ready(payload) => Ok(payload),
            FrameSlot::Pending(_) => Err(TrpxError::Pool("frame encode not forced".into())),
        }
    }
}

use crate::error::Error;
#[allow(unused_imports)]
use crate::log::{debug, trace};
use crate::msgs::enums::MaxFragmentLength;
use crate::suites::RecordOverhead;

/// Requested plaintext capacities for the receive and transmit buffers.
///
/// Each size is clamped into `MIN_SIZE..=MAX_SIZE`, so the usable
/// capacity after construction is exactly what `recv()`/`xmit()` report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSizes {
    recv: usize,
    xmit: usize,
}

impl BufferSizes {
    /// Smallest plaintext capacity we will allocate.
    pub const MIN_SIZE: usize = 512;
    /// Largest plaintext a single TLS record can carry.
    pub const MAX_SIZE: usize = 16384;

    /// Builds clamped sizes.
    pub fn new(recv: usize, xmit: usize) -> Self {
        Self {
            recv: recv.clamp(Self::MIN_SIZE, Self::MAX_SIZE),
            xmit: xmit.clamp(Self::MIN_SIZE, Self::MAX_SIZE),
        }
    }

    /// Plaintext capacity of the receive buffer.
    pub fn recv(&self) -> usize {
        self.recv
    }

    /// Plaintext capacity of the transmit buffer.
    pub fn xmit(&self) -> usize {
        self.xmit
    }

    /// The fragment length to ask the server for, when our receive
    /// buffer cannot hold a full-size record.
    pub fn advertised_fragment_length(&self) -> Option<MaxFragmentLength> {
        match self.recv < Self::MAX_SIZE {
            true => MaxFragmentLength::fitting(self.recv),
            false => None,
        }
    }
}

impl Default for BufferSizes {
    fn default() -> Self {
        Self::new(Self::MAX_SIZE, Self::MAX_SIZE)
    }
}

/// Whether the engine gets separate receive and transmit buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferMode {
    /// Separate buffers; reads and writes may interleave.
    #[default]
    FullDuplex,
    /// One buffer for both directions.
    HalfDuplex,
}

/// The record buffers handed to an engine.
///
/// Owned by the engine for the life of one connection and freed when the
/// engine is dropped.
pub struct RecordBuffers {
    input: Vec<u8>,
    output: Option<Vec<u8>>,
    sizes: BufferSizes,
}

impl RecordBuffers {
    /// Allocates buffers for `sizes` plus `overhead`.
    ///
    /// Allocation failure is reported as [`Error::OutOfMemory`]; nothing is
    /// retained in that case.
    pub fn allocate(
        sizes: BufferSizes,
        overhead: RecordOverhead,
        mode: BufferMode,
    ) -> Result<Self, Error> {
        let in_len = sizes.recv + overhead.input;
        let out_len = sizes.xmit + overhead.output;
        let (input, output) = match mode {
            BufferMode::FullDuplex => (try_alloc(in_len)?, Some(try_alloc(out_len)?)),
            BufferMode::HalfDuplex => (try_alloc(in_len.max(out_len))?, None),
        };
        trace!(
            "record buffers: in={} out={} ({:?})",
            input.len(),
            output.as_ref().map_or(0, Vec::len),
            mode
        );
        Ok(Self {
            input,
            output,
            sizes,
        })
    }

    /// The receive buffer, including its reserved overhead.
    pub fn input_mut(&mut self) -> &mut [u8] {
        &mut self.input
    }

    /// The transmit buffer; the receive buffer in half-duplex mode.
    pub fn output_mut(&mut self) -> &mut [u8] {
        match &mut self.output {
            Some(out) => out,
            None => &mut self.input,
        }
    }

    /// Allocated length of the receive buffer.
    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Allocated length of the transmit buffer.
    pub fn output_len(&self) -> usize {
        self.output
            .as_ref()
            .map_or(self.input.len(), Vec::len)
    }

    /// Whether one buffer serves both directions.
    pub fn is_half_duplex(&self) -> bool {
        self.output.is_none()
    }

    /// The plaintext capacities these buffers were sized for.
    pub fn sizes(&self) -> BufferSizes {
        self.sizes
    }
}

impl core::fmt::Debug for RecordBuffers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecordBuffers")
            .field("input_len", &self.input_len())
            .field("output_len", &self.output_len())
            .field("half_duplex", &self.is_half_duplex())
            .finish()
    }
}

/// A zero-filled buffer of `len` bytes, or `OutOfMemory`.
pub(crate) fn try_alloc(len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

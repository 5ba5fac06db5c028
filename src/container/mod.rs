//! Container parsing and building.
//!
//! Every format is parsed by the same engine:
//!
//! ```text
//! Unstarted -> HeaderRead -> OffsetTableRead -> ChunkParsed* -> Validated -> Built
//!     \____________\______________\________________\______________\-> Failed
//! ```
//!
//! A format describes itself with a [`ContainerFrame`] implementation: how
//! to read its fixed header and offset table, and a table of [`ChunkSpec`]s
//! naming each chunk's magic, section id and parser. Offset table entries
//! are matched to specs by the magic found at their offset, by the section
//! id the table gives them, or by position. The engine checks magics and
//! cross-checks every tagged chunk's declared length against the offset
//! table before handing it to the chunk parser.
//!
//! Writers compute every length up front from the stream's dimensions and
//! the [`Configuration`], then serialize in one pass.

pub mod bcfstm;
pub mod binary;
pub mod brstm;
pub mod idsp;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::{
    config::Configuration,
    error::{Error, HeaderError, Result},
    format::AudioFormat,
    gc_adpcm::GcAdpcmFormat,
    loop_context::LoopContext,
    math::{get_next_multiple, sample_count_to_byte_count, DivideByRoundUp},
    BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};
use binary::{ByteReader, ByteWriter, Endianness};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Brstm,
    Bcstm,
    Bfstm,
    Idsp,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 4] =
        [ContainerKind::Brstm, ContainerKind::Bcstm, ContainerKind::Bfstm, ContainerKind::Idsp];

    pub fn magic(self) -> &'static [u8; 4] {
        match self {
            ContainerKind::Brstm => b"RSTM",
            ContainerKind::Bcstm => b"CSTM",
            ContainerKind::Bfstm => b"FSTM",
            ContainerKind::Idsp => b"IDSP",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ContainerKind::Brstm => "brstm",
            ContainerKind::Bcstm => "bcstm",
            ContainerKind::Bfstm => "bfstm",
            ContainerKind::Idsp => "idsp",
        }
    }

    /// Identifies a container by its leading magic.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| bytes.starts_with(kind.magic()))
    }
}

/// A parsed container with the writer settings that reproduce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContainer {
    pub kind: ContainerKind,
    pub audio: GcAdpcmFormat,
    pub configuration: Configuration,
}

pub fn read_container(bytes: impl Into<Bytes>) -> Result<GcAdpcmFormat> {
    parse_container(bytes).map(|parsed| parsed.audio)
}

pub fn parse_container(bytes: impl Into<Bytes>) -> Result<ParsedContainer> {
    let bytes = bytes.into();
    match ContainerKind::detect(&bytes) {
        Some(ContainerKind::Brstm) => parse::<brstm::BrstmFrame>(bytes),
        Some(ContainerKind::Bcstm) => parse::<bcfstm::BcstmFrame>(bytes),
        Some(ContainerKind::Bfstm) => parse::<bcfstm::BfstmFrame>(bytes),
        Some(ContainerKind::Idsp) => parse::<idsp::IdspFrame>(bytes),
        None => {
            let found = &bytes[..bytes.len().min(4)];
            Err(HeaderError::bad_magic(b"RSTM, CSTM, FSTM or IDSP", found).into())
        }
    }
}

/// Serializes `audio`. A loop alignment multiple above 1 in `config`
/// realigns the stream before writing.
pub fn write_container(
    audio: &GcAdpcmFormat,
    kind: ContainerKind,
    config: &Configuration,
) -> Result<Bytes> {
    let aligned;
    let audio = if config.loop_alignment_multiple() > 1 {
        aligned = audio.with_alignment(config.loop_alignment_multiple())?;
        &aligned
    } else {
        audio
    };

    match kind {
        ContainerKind::Brstm => brstm::write(audio, config),
        ContainerKind::Bcstm => bcfstm::write::<bcfstm::Cstm>(audio, config),
        ContainerKind::Bfstm => bcfstm::write::<bcfstm::Fstm>(audio, config),
        ContainerKind::Idsp => idsp::write(audio, config),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseState {
    Unstarted,
    HeaderRead,
    OffsetTableRead,
    ChunkParsed(&'static str),
    Validated,
    Built,
    Failed,
}

/// How an offset table entry names the chunk it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkTag {
    /// Matched to the specs without a magic or id, in order.
    Position,
    /// The region starts with a 4-byte magic and its own 32-bit length.
    Magic,
    /// The table gives a section id. The region still starts with a magic.
    Id(u16),
}

/// One region listed in a container's offset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkEntry {
    pub offset: usize,
    pub length: usize,
    pub tag: ChunkTag,
}

pub(crate) type ChunkParser<F> = fn(&mut ByteReader, ChunkEntry, &mut F) -> Result<()>;

pub(crate) struct ChunkSpec<F> {
    pub name: &'static str,
    /// `None` for regions without a chunk header. These are matched to
    /// untagged offset table entries in order.
    pub magic: Option<&'static [u8; 4]>,
    pub id: Option<u16>,
    pub required: bool,
    pub parse: ChunkParser<F>,
}

/// Transient wire structure of one container format.
pub(crate) trait ContainerFrame: Default + Sized + 'static {
    const KIND: ContainerKind;
    const ENDIANNESS: Endianness;

    fn chunks() -> &'static [ChunkSpec<Self>];

    /// Reads the fixed header following the magic.
    fn read_header(&mut self, reader: &mut ByteReader) -> Result<()>;

    fn read_offset_table(&mut self, reader: &mut ByteReader) -> Result<Vec<ChunkEntry>>;

    fn validate(&self) -> Result<()>;

    fn build(self) -> Result<(GcAdpcmFormat, Configuration)>;
}

fn advance(kind: ContainerKind, state: &mut ParseState, next: ParseState) {
    trace!(?kind, from = ?*state, to = ?next, "parse state");
    *state = next;
}

pub(crate) fn parse<F: ContainerFrame>(bytes: Bytes) -> Result<ParsedContainer> {
    let mut state = ParseState::Unstarted;
    let result = run_parser::<F>(bytes, &mut state);

    if let Err(error) = &result {
        trace!(kind = ?F::KIND, from = ?state, to = ?ParseState::Failed, %error, "parse state");
    }
    result
}

fn run_parser<F: ContainerFrame>(bytes: Bytes, state: &mut ParseState) -> Result<ParsedContainer> {
    let kind = F::KIND;
    let mut reader = ByteReader::new(bytes, F::ENDIANNESS);
    let mut frame = F::default();

    reader.expect_magic(kind.magic())?;
    frame.read_header(&mut reader)?;
    advance(kind, state, ParseState::HeaderRead);

    let entries = frame.read_offset_table(&mut reader)?;
    advance(kind, state, ParseState::OffsetTableRead);

    let specs = F::chunks();
    let mut untagged = specs.iter().filter(|spec| spec.magic.is_none() && spec.id.is_none());
    let mut parsed: Vec<&'static str> = Vec::with_capacity(entries.len());

    for entry in entries {
        if entry.offset.checked_add(entry.length).map_or(true, |end| end > reader.len()) {
            return Err(Error::UnexpectedEof { offset: entry.offset, needed: entry.length });
        }

        let spec = match entry.tag {
            ChunkTag::Position => untagged.next().ok_or_else(|| {
                Error::UnknownChunk(format!("untagged region at {:#x}", entry.offset))
            })?,
            ChunkTag::Magic => find_tagged(&mut reader, specs, entry)?,
            ChunkTag::Id(id) => specs
                .iter()
                .find(|spec| spec.id == Some(id))
                .ok_or_else(|| Error::UnknownChunk(format!("section {:#06x}", id)))?,
        };

        reader.set_position(entry.offset)?;
        if let Some(magic) = spec.magic {
            reader.expect_magic(magic)?;
            let declared_length = reader.read_offset()?;
            if declared_length != entry.length {
                return Err(Error::ChunkLengthMismatch {
                    chunk: spec.name,
                    table_length: entry.length,
                    declared_length,
                });
            }
        }

        (spec.parse)(&mut reader, entry, &mut frame)?;
        parsed.push(spec.name);
        advance(kind, state, ParseState::ChunkParsed(spec.name));
    }

    let missing = specs.iter().find(|spec| spec.required && !parsed.contains(&spec.name));
    if let Some(missing) = missing {
        return Err(HeaderError::MissingChunk { chunk: missing.name }.into());
    }

    frame.validate()?;
    advance(kind, state, ParseState::Validated);

    let (audio, configuration) = frame.build()?;
    advance(kind, state, ParseState::Built);

    debug!(
        ?kind,
        channels = audio.channels().len(),
        samples = audio.channels().first().map_or(0, |c| c.sample_count()),
        "parsed container"
    );

    Ok(ParsedContainer { kind, audio, configuration })
}

fn find_tagged<F>(
    reader: &mut ByteReader,
    specs: &'static [ChunkSpec<F>],
    entry: ChunkEntry,
) -> Result<&'static ChunkSpec<F>> {
    reader.set_position(entry.offset)?;
    let tag = reader
        .peek_bytes(4)
        .ok_or(Error::UnexpectedEof { offset: entry.offset, needed: 4 })?;

    specs
        .iter()
        .find(|spec| spec.magic.is_some_and(|magic| magic.as_slice() == tag))
        .ok_or_else(|| Error::UnknownChunk(String::from_utf8_lossy(tag).into_owned()))
}

pub(crate) fn write_chunk_header(writer: &mut ByteWriter, magic: &[u8; 4], length: usize) {
    writer.write_bytes(magic);
    writer.write_offset(length);
}

/// Pads the output to the precomputed file length.
pub(crate) fn finish(mut writer: ByteWriter, kind: ContainerKind, file_length: usize) -> Bytes {
    writer.pad_to_len(file_length);
    debug_assert_eq!(writer.len(), file_length, "{:?} layout disagrees with output", kind);
    debug!(?kind, file_length, "wrote container");
    writer.into_bytes()
}

/// Block structure of the RSTM family. Every block holds
/// `samples_per_interleave` samples except the last, whose size is padded
/// to 0x20 bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    pub interleave_count: usize,
    pub interleave_size: usize,
    pub samples_per_interleave: usize,
    pub last_block_size_without_padding: usize,
    pub last_block_samples: usize,
    pub last_block_size: usize,
}

impl BlockLayout {
    pub const LAST_BLOCK_ALIGNMENT: usize = 0x20;

    /// `samples_per_interleave` must be a non-zero multiple of 14.
    pub fn new(sample_count: usize, samples_per_interleave: usize) -> Self {
        let interleave_count = sample_count.divide_by_round_up(samples_per_interleave);
        let last_block_samples = match interleave_count {
            0 => 0,
            n => sample_count - (n - 1) * samples_per_interleave,
        };
        let last_block_size_without_padding = sample_count_to_byte_count(last_block_samples);

        Self {
            interleave_count,
            interleave_size: samples_per_interleave / SAMPLES_PER_FRAME * BYTES_PER_FRAME,
            samples_per_interleave,
            last_block_size_without_padding,
            last_block_samples,
            last_block_size: get_next_multiple(
                last_block_size_without_padding,
                Self::LAST_BLOCK_ALIGNMENT,
            ),
        }
    }

    /// Checks stored block fields against the ones `sample_count` implies.
    /// The stored last block may carry more padding than needed.
    pub fn check(&self, sample_count: usize) -> Result<()> {
        let samples_per_interleave = self.samples_per_interleave;
        if samples_per_interleave == 0 || samples_per_interleave % SAMPLES_PER_FRAME != 0 {
            let samples = samples_per_interleave as i64;
            return Err(Error::invalid_field("samples per interleave", samples));
        }

        let expected = Self::new(sample_count, samples_per_interleave);
        if self.interleave_size != expected.interleave_size {
            return Err(Error::invalid_field("interleave size", self.interleave_size as i64));
        }
        if self.interleave_count != expected.interleave_count {
            return Err(Error::invalid_field("interleave count", self.interleave_count as i64));
        }
        if self.last_block_samples != expected.last_block_samples
            || self.last_block_size < self.last_block_size_without_padding
        {
            let samples = self.last_block_samples as i64;
            return Err(Error::invalid_field("last block samples", samples));
        }

        Ok(())
    }

    /// Bytes of interleaved audio for `channel_count` channels.
    pub fn audio_length(&self, channel_count: usize) -> usize {
        match self.interleave_count {
            0 => 0,
            n => ((n - 1) * self.interleave_size + self.last_block_size) * channel_count,
        }
    }
}

/// Loop contexts for every channel, resolved in parallel. Streams without a
/// loop store the first frame's header and zero history.
pub(crate) fn loop_contexts(audio: &GcAdpcmFormat) -> Vec<LoopContext> {
    let info = audio.info();
    audio
        .channels()
        .par_iter()
        .map(|channel| {
            if info.looping {
                channel.loop_context(info.loop_start)
            } else {
                LoopContext { predictor_scale: channel.predictor_scale(), ..Default::default() }
            }
        })
        .collect()
}

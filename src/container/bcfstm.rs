//! BCSTM (`.bcstm`) and BFSTM (`.bfstm`) streams.
//!
//! Both share one layout. CSTM files are little-endian and FSTM files are
//! big-endian; the byte order mark must agree.
//!
//! ```text
//! 0x00  header: magic, byte order mark, header length, version, file
//!       length, section count, then (id, offset, length) per section
//! 0x40  INFO  references to the stream info, track table and channel table
//!       SEEK  seek table, entries interleaved by channel
//!       DATA  0x20-byte chunk header, then the interleaved audio
//! ```
//!
//! A reference is a 16-bit type, two bytes of padding and a 32-bit offset.
//! The three INFO references are relative to the end of the INFO chunk
//! header. Entries of the track and channel tables are relative to their
//! table.

use std::marker::PhantomData;

use bytes::Bytes;
use tracing::{debug, trace};

use super::{
    binary::{ByteReader, ByteWriter, Endianness},
    finish, loop_contexts, write_chunk_header, BlockLayout, ChunkEntry, ChunkSpec, ChunkTag,
    ContainerFrame, ContainerKind,
};
use crate::{
    channel::GcAdpcmChannel,
    config::{Configuration, SeekTableType},
    error::{Error, HeaderError, Result},
    format::AudioFormat,
    gc_adpcm::{GcAdpcmFormat, GcAdpcmTrack},
    interleave::{deinterleave, interleave, InterleaveLayout},
    loop_context::LoopContext,
    math::{get_next_multiple, sample_count_to_frame_bytes},
    seek_table::{entry_count, tables_from_bytes, tables_to_bytes, SeekTable, BYTES_PER_ENTRY},
};

const CODEC_GC_ADPCM: u8 = 2;
const ALIGNMENT: usize = 0x20;

const HEADER_LENGTH: usize = 0x40;
const CHUNK_HEADER_LENGTH: usize = 8;
const INFO_TABLE_LENGTH: usize = 8 * 3;
const STREAM_INFO_LENGTH: usize = 0x3C;
const TRACK_INFO_LENGTH: usize = 0x14;
const CHANNEL_INFO_LENGTH: usize = 0x38;
const DATA_HEADER_LENGTH: usize = 0x20;

const INFO_SECTION: u16 = 0x4000;
const SEEK_SECTION: u16 = 0x4001;
const DATA_SECTION: u16 = 0x4002;
const REGION_SECTION: u16 = 0x4003;
const PREFETCH_SECTION: u16 = 0x4004;

const BYTE_TABLE_REFERENCE: u16 = 0x0100;
const TABLE_REFERENCE: u16 = 0x0101;
const ADPCM_INFO_REFERENCE: u16 = 0x0300;
const SAMPLE_DATA_REFERENCE: u16 = 0x1F00;
const STREAM_INFO_REFERENCE: u16 = 0x4100;
const TRACK_INFO_REFERENCE: u16 = 0x4101;
const CHANNEL_INFO_REFERENCE: u16 = 0x4102;

/// Offset of an absent reference or section.
const NULL_OFFSET: usize = u32::MAX as usize;

/// Files of this version repeat the loop points unaligned after the stream
/// info.
const UNALIGNED_LOOP_VERSION: u32 = 4;

/// One member of the family: its magic, byte order and written version.
pub(crate) trait StreamRevision: 'static {
    const KIND: ContainerKind;
    const ENDIANNESS: Endianness;
    /// Written as the high half of the 32-bit version field.
    const VERSION: u16;
}

#[derive(Debug)]
pub(crate) enum Cstm {}

impl StreamRevision for Cstm {
    const KIND: ContainerKind = ContainerKind::Bcstm;
    const ENDIANNESS: Endianness = Endianness::Little;
    const VERSION: u16 = 0x0202;
}

#[derive(Debug)]
pub(crate) enum Fstm {}

impl StreamRevision for Fstm {
    const KIND: ContainerKind = ContainerKind::Bfstm;
    const ENDIANNESS: Endianness = Endianness::Big;
    const VERSION: u16 = 0x0003;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StreamInfo {
    looping: bool,
    channel_count: usize,
    sample_rate: u32,
    loop_start: usize,
    sample_count: usize,
    blocks: BlockLayout,
    bytes_per_seek_entry: usize,
    samples_per_seek_entry: usize,
    /// Relative to the end of the DATA chunk header.
    audio_data_offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ChannelInfo {
    coefficients: [i16; 16],
    hist_1: i16,
    hist_2: i16,
    loop_predictor_scale: i16,
    loop_hist_1: i16,
    loop_hist_2: i16,
    gain: i16,
}

#[derive(Debug, Clone, Default)]
struct Info {
    stream: StreamInfo,
    /// `None` when the file has no track table.
    tracks: Option<Vec<GcAdpcmTrack>>,
    channels: Vec<ChannelInfo>,
}

pub(crate) struct BcfstmFrame<R> {
    version: u32,
    info: Option<Info>,
    seek_tables: Option<Vec<SeekTable>>,
    audio: Option<Vec<Vec<u8>>>,
    revision: PhantomData<R>,
}

pub(crate) type BcstmFrame = BcfstmFrame<Cstm>;
pub(crate) type BfstmFrame = BcfstmFrame<Fstm>;

impl<R> Default for BcfstmFrame<R> {
    fn default() -> Self {
        Self { version: 0, info: None, seek_tables: None, audio: None, revision: PhantomData }
    }
}

fn read_reference(reader: &mut ByteReader, types: &[u16], field: &'static str) -> Result<usize> {
    let reference_type = reader.read_u16()?;
    if !types.contains(&reference_type) {
        return Err(Error::invalid_field(field, reference_type as i64));
    }
    reader.skip(2)?;
    reader.read_offset()
}

fn write_reference(writer: &mut ByteWriter, reference_type: u16, offset: usize) {
    writer.write_u16(reference_type);
    writer.write_u16(0);
    writer.write_offset(offset);
}

impl<R: StreamRevision> BcfstmFrame<R> {
    const CHUNKS: &'static [ChunkSpec<Self>] = &[
        ChunkSpec {
            name: "INFO",
            magic: Some(b"INFO"),
            id: Some(INFO_SECTION),
            required: true,
            parse: Self::parse_info,
        },
        ChunkSpec {
            name: "SEEK",
            magic: Some(b"SEEK"),
            id: Some(SEEK_SECTION),
            required: false,
            parse: Self::parse_seek,
        },
        ChunkSpec {
            name: "DATA",
            magic: Some(b"DATA"),
            id: Some(DATA_SECTION),
            required: true,
            parse: Self::parse_data,
        },
        ChunkSpec {
            name: "REGN",
            magic: Some(b"REGN"),
            id: Some(REGION_SECTION),
            required: false,
            parse: Self::skip_section,
        },
        ChunkSpec {
            name: "PDAT",
            magic: Some(b"PDAT"),
            id: Some(PREFETCH_SECTION),
            required: false,
            parse: Self::skip_section,
        },
    ];

    fn info(&self) -> Result<&Info> {
        self.info.as_ref().ok_or(HeaderError::MissingChunk { chunk: "INFO" }.into())
    }

    fn parse_info(reader: &mut ByteReader, entry: ChunkEntry, frame: &mut Self) -> Result<()> {
        let base = entry.offset + CHUNK_HEADER_LENGTH;

        let stream_info =
            read_reference(reader, &[STREAM_INFO_REFERENCE], "stream info reference")?;
        let track_table = read_reference(reader, &[TABLE_REFERENCE, 0], "track table reference")?;
        let channel_table = read_reference(reader, &[TABLE_REFERENCE], "channel table reference")?;

        reader.set_position(base + stream_info)?;
        let stream = read_stream_info(reader, frame.version)?;

        let tracks = match track_table {
            NULL_OFFSET => None,
            offset => Some(read_tracks(reader, base + offset)?),
        };
        let channels = read_channels(reader, base + channel_table, stream.channel_count)?;

        frame.info = Some(Info { stream, tracks, channels });
        Ok(())
    }

    fn parse_seek(reader: &mut ByteReader, entry: ChunkEntry, frame: &mut Self) -> Result<()> {
        let stream = &frame.info()?.stream;
        let (channel_count, samples_per_entry) =
            (stream.channel_count, stream.samples_per_seek_entry);
        if samples_per_entry < 2 {
            let samples = samples_per_entry as i64;
            return Err(Error::invalid_field("samples per seek entry", samples));
        }

        let count = entry_count(stream.sample_count, samples_per_entry, SeekTableType::Standard);
        let table_length = count * BYTES_PER_ENTRY * channel_count;
        if CHUNK_HEADER_LENGTH + table_length > entry.length {
            return Err(Error::invalid_field("seek chunk length", entry.length as i64));
        }

        let table = reader.read_bytes(table_length)?;
        let endianness = reader.endianness();
        frame.seek_tables =
            Some(tables_from_bytes(&table, channel_count, samples_per_entry, endianness));
        Ok(())
    }

    fn parse_data(reader: &mut ByteReader, entry: ChunkEntry, frame: &mut Self) -> Result<()> {
        let stream = frame.info()?.stream.clone();
        let blocks = stream.blocks;
        let channel_length = sample_count_to_frame_bytes(stream.sample_count);
        let layout =
            InterleaveLayout::new(channel_length, blocks.interleave_size, blocks.last_block_size)?;
        let audio_length = layout.total_length(stream.channel_count);

        let audio_data_offset = entry.offset + CHUNK_HEADER_LENGTH + stream.audio_data_offset;
        if audio_data_offset + audio_length > entry.offset + entry.length {
            let offset = stream.audio_data_offset as i64;
            return Err(Error::invalid_field("audio data offset", offset));
        }

        reader.set_position(audio_data_offset)?;
        let audio = reader.read_bytes(audio_length)?;
        let channels = deinterleave(
            &audio,
            blocks.interleave_size,
            blocks.last_block_size,
            stream.channel_count,
            channel_length,
        )?;

        frame.audio = Some(channels);
        Ok(())
    }

    fn skip_section(_reader: &mut ByteReader, entry: ChunkEntry, _frame: &mut Self) -> Result<()> {
        trace!(offset = entry.offset, length = entry.length, "skipping section");
        Ok(())
    }
}

fn read_stream_info(reader: &mut ByteReader, version: u32) -> Result<StreamInfo> {
    let codec = reader.read_u8()?;
    if codec != CODEC_GC_ADPCM {
        return Err(Error::UnsupportedCodec(codec));
    }

    let looping = reader.read_u8()? == 1;
    let channel_count = reader.read_u8()? as usize;
    reader.skip(1)?;

    let info = StreamInfo {
        looping,
        channel_count,
        sample_rate: reader.read_u32()?,
        loop_start: reader.read_offset()?,
        sample_count: reader.read_offset()?,
        blocks: BlockLayout {
            interleave_count: reader.read_offset()?,
            interleave_size: reader.read_offset()?,
            samples_per_interleave: reader.read_offset()?,
            last_block_size_without_padding: reader.read_offset()?,
            last_block_samples: reader.read_offset()?,
            last_block_size: reader.read_offset()?,
        },
        bytes_per_seek_entry: reader.read_offset()?,
        samples_per_seek_entry: reader.read_offset()?,
        audio_data_offset: read_reference(
            reader,
            &[SAMPLE_DATA_REFERENCE],
            "sample data reference",
        )?,
    };

    // 0x100 announces ten more bytes of stream info.
    if reader.read_u16()? == 0x100 {
        reader.skip(10)?;
    }
    if version == UNALIGNED_LOOP_VERSION {
        let loop_start = reader.read_u32()?;
        let loop_end = reader.read_u32()?;
        trace!(loop_start, loop_end, "unaligned loop");
    }

    Ok(info)
}

fn read_tracks(reader: &mut ByteReader, table: usize) -> Result<Vec<GcAdpcmTrack>> {
    reader.set_position(table)?;
    let count = reader.read_offset()?;

    let mut offsets = Vec::new();
    for _ in 0..count {
        offsets.push(read_reference(reader, &[TRACK_INFO_REFERENCE], "track reference")?);
    }

    offsets
        .into_iter()
        .map(|offset| {
            reader.set_position(table + offset)?;
            let volume = reader.read_u8()?;
            let panning = reader.read_u8()?;
            // Flags, then the reference to the channel index table that
            // follows.
            reader.skip(2 + 8)?;

            Ok(GcAdpcmTrack {
                channel_count: reader.read_offset()?,
                channel_left: reader.read_u8()? as usize,
                channel_right: reader.read_u8()? as usize,
                volume,
                panning,
            })
        })
        .collect()
}

fn read_channels(
    reader: &mut ByteReader,
    table: usize,
    channel_count: usize,
) -> Result<Vec<ChannelInfo>> {
    reader.set_position(table)?;
    let count = reader.read_offset()?;
    if count != channel_count {
        return Err(Error::invalid_field("channel table count", count as i64));
    }

    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(read_reference(reader, &[CHANNEL_INFO_REFERENCE], "channel reference")?);
    }

    offsets
        .into_iter()
        .map(|offset| {
            let channel_info = table + offset;
            reader.set_position(channel_info)?;
            let adpcm_info =
                read_reference(reader, &[ADPCM_INFO_REFERENCE], "adpcm info reference")?;
            reader.set_position(channel_info + adpcm_info)?;

            let coefficients = reader.read_coefficients()?;
            // The initial predictor/scale repeats the first audio byte.
            reader.skip(2)?;

            Ok(ChannelInfo {
                coefficients,
                hist_1: reader.read_i16()?,
                hist_2: reader.read_i16()?,
                loop_predictor_scale: reader.read_i16()?,
                loop_hist_1: reader.read_i16()?,
                loop_hist_2: reader.read_i16()?,
                gain: reader.read_i16()?,
            })
        })
        .collect()
}

impl<R: StreamRevision> ContainerFrame for BcfstmFrame<R> {
    const KIND: ContainerKind = R::KIND;
    const ENDIANNESS: Endianness = R::ENDIANNESS;

    fn chunks() -> &'static [ChunkSpec<Self>] {
        Self::CHUNKS
    }

    fn read_header(&mut self, reader: &mut ByteReader) -> Result<()> {
        let mark = reader.read_u16()?;
        if mark != 0xFEFF {
            return Err(Error::invalid_field("byte order mark", mark as i64));
        }

        let _header_length = reader.read_u16()?;
        self.version = reader.read_u32()? >> 16;

        // Trailing data past the declared length is allowed.
        let file_length = reader.read_offset()?;
        if file_length > reader.len() {
            let actual = reader.len();
            return Err(HeaderError::FileLengthMismatch { declared: file_length, actual }.into());
        }

        Ok(())
    }

    fn read_offset_table(&mut self, reader: &mut ByteReader) -> Result<Vec<ChunkEntry>> {
        let section_count = reader.read_u16()? as usize;
        reader.skip(2)?;

        let mut entries = Vec::with_capacity(section_count);
        for _ in 0..section_count {
            let id = reader.read_u16()?;
            reader.skip(2)?;
            let offset = reader.read_offset()?;
            let length = reader.read_offset()?;
            if offset != NULL_OFFSET {
                entries.push(ChunkEntry { offset, length, tag: ChunkTag::Id(id) });
            }
        }
        Ok(entries)
    }

    fn validate(&self) -> Result<()> {
        let info = self.info()?;
        let stream = &info.stream;
        stream.blocks.check(stream.sample_count)?;

        if stream.bytes_per_seek_entry != BYTES_PER_ENTRY {
            let bytes = stream.bytes_per_seek_entry as i64;
            return Err(Error::invalid_field("bytes per seek entry", bytes));
        }
        if self.audio.as_ref().map_or(0, Vec::len) != info.channels.len() {
            return Err(Error::invalid_field("channel count", stream.channel_count as i64));
        }

        Ok(())
    }

    fn build(self) -> Result<(GcAdpcmFormat, Configuration)> {
        let Info { stream, tracks, channels } = match self.info {
            Some(info) => info,
            None => return Err(HeaderError::MissingChunk { chunk: "INFO" }.into()),
        };
        let audio = self.audio.unwrap_or_default();

        let mut seek_tables: Vec<Option<SeekTable>> = match self.seek_tables {
            Some(tables) => tables.into_iter().map(Some).collect(),
            None => vec![None; channels.len()],
        };

        let configuration = Configuration::builder()
            .samples_per_interleave(stream.blocks.samples_per_interleave)
            .samples_per_seek_entry(stream.samples_per_seek_entry)
            .recalculate_seek_table(seek_tables.iter().any(Option::is_none))
            .build()?;

        let channels = channels
            .into_iter()
            .zip(audio)
            .zip(seek_tables.iter_mut())
            .map(|((channel, audio), seek_table)| {
                let mut built =
                    GcAdpcmChannel::new(audio, channel.coefficients, stream.sample_count)?
                        .with_gain(channel.gain)
                        .with_history(channel.hist_1, channel.hist_2);

                if let Some(table) = seek_table.take() {
                    built = built.with_seek_table(table);
                }
                if stream.looping {
                    built = built.with_loop_context(LoopContext {
                        loop_start: stream.loop_start,
                        predictor_scale: channel.loop_predictor_scale as u8,
                        hist_1: channel.loop_hist_1,
                        hist_2: channel.loop_hist_2,
                    });
                }
                Ok(built)
            })
            .collect::<Result<Vec<_>>>()?;

        let audio = GcAdpcmFormat::builder(stream.sample_rate, channels)
            .tracks(tracks.unwrap_or_default())
            .with_loop(stream.looping, stream.loop_start, stream.sample_count)
            .build()?;

        Ok((audio, configuration))
    }
}

/// Every size and offset of a file, derived before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BcfstmLayout {
    channel_count: usize,
    track_count: usize,
    sample_count: usize,
    blocks: BlockLayout,
    samples_per_seek_entry: usize,
    seek_entry_count: usize,
    info_length: usize,
    seek_length: usize,
    data_length: usize,
}

impl BcfstmLayout {
    fn new(audio: &GcAdpcmFormat, config: &Configuration) -> Self {
        let channel_count = audio.channel_count();
        let track_count = audio.tracks().len();
        let sample_count = audio.info().sample_count;
        let blocks = BlockLayout::new(sample_count, config.samples_per_interleave());

        let samples_per_seek_entry = config.samples_per_seek_entry();
        let seek_entry_count =
            entry_count(sample_count, samples_per_seek_entry, SeekTableType::Standard);

        let track_table_length = 4 + (8 + TRACK_INFO_LENGTH) * track_count;
        let channel_table_length = 4 + (8 + CHANNEL_INFO_LENGTH) * channel_count;
        let info_length = get_next_multiple(
            CHUNK_HEADER_LENGTH
                + INFO_TABLE_LENGTH
                + STREAM_INFO_LENGTH
                + track_table_length
                + channel_table_length,
            ALIGNMENT,
        );

        let seek_length = get_next_multiple(
            CHUNK_HEADER_LENGTH + seek_entry_count * channel_count * BYTES_PER_ENTRY,
            ALIGNMENT,
        );

        let data_length = get_next_multiple(
            DATA_HEADER_LENGTH + blocks.audio_length(channel_count),
            ALIGNMENT,
        );

        Self {
            channel_count,
            track_count,
            sample_count,
            blocks,
            samples_per_seek_entry,
            seek_entry_count,
            info_length,
            seek_length,
            data_length,
        }
    }

    fn info_offset(&self) -> usize {
        HEADER_LENGTH
    }

    fn seek_offset(&self) -> usize {
        self.info_offset() + self.info_length
    }

    fn data_offset(&self) -> usize {
        self.seek_offset() + self.seek_length
    }

    fn file_length(&self) -> usize {
        self.data_offset() + self.data_length
    }

    fn track_table_offset(&self) -> usize {
        INFO_TABLE_LENGTH + STREAM_INFO_LENGTH
    }

    fn channel_table_offset(&self) -> usize {
        self.track_table_offset() + 4 + (8 + TRACK_INFO_LENGTH) * self.track_count
    }
}

/// Writes a looping stream truncated to its loop end, like RSTM.
pub(crate) fn write<R: StreamRevision>(
    audio: &GcAdpcmFormat,
    config: &Configuration,
) -> Result<Bytes> {
    let trimmed;
    let audio = if audio.info().looping {
        trimmed = audio.truncated(audio.info().loop_end)?;
        &trimmed
    } else {
        audio
    };

    if audio.channel_count() > u8::MAX as usize {
        let count = audio.channel_count();
        return Err(Error::out_of_range("channel count", count, "stream info stores 8 bits"));
    }

    let layout = BcfstmLayout::new(audio, config);
    debug!(
        kind = ?R::KIND,
        channels = layout.channel_count,
        samples = layout.sample_count,
        interleave_count = layout.blocks.interleave_count,
        seek_entries = layout.seek_entry_count,
        file_length = layout.file_length(),
        "writing stream"
    );

    let mut writer = ByteWriter::with_capacity(layout.file_length(), R::ENDIANNESS);
    write_file_header::<R>(&mut writer, &layout);
    write_info_chunk(&mut writer, &layout, audio);
    write_seek_chunk(&mut writer, &layout, audio, config);
    write_data_chunk(&mut writer, &layout, audio)?;

    Ok(finish(writer, R::KIND, layout.file_length()))
}

fn write_file_header<R: StreamRevision>(writer: &mut ByteWriter, layout: &BcfstmLayout) {
    writer.write_bytes(R::KIND.magic());
    writer.write_u16(0xFEFF);
    writer.write_u16(HEADER_LENGTH as u16);
    writer.write_u32((R::VERSION as u32) << 16);
    writer.write_offset(layout.file_length());

    let sections = [
        (INFO_SECTION, layout.info_offset(), layout.info_length),
        (SEEK_SECTION, layout.seek_offset(), layout.seek_length),
        (DATA_SECTION, layout.data_offset(), layout.data_length),
    ];
    writer.write_u16(sections.len() as u16);
    writer.write_u16(0);
    for (id, offset, length) in sections {
        writer.write_u16(id);
        writer.write_u16(0);
        writer.write_offset(offset);
        writer.write_offset(length);
    }

    writer.pad_to_len(HEADER_LENGTH);
}

fn write_info_chunk(writer: &mut ByteWriter, layout: &BcfstmLayout, audio: &GcAdpcmFormat) {
    let info = audio.info();
    let blocks = &layout.blocks;
    write_chunk_header(writer, b"INFO", layout.info_length);

    write_reference(writer, STREAM_INFO_REFERENCE, INFO_TABLE_LENGTH);
    write_reference(writer, TABLE_REFERENCE, layout.track_table_offset());
    write_reference(writer, TABLE_REFERENCE, layout.channel_table_offset());

    writer.write_u8(CODEC_GC_ADPCM);
    writer.write_u8(info.looping as u8);
    writer.write_u8(layout.channel_count as u8);
    writer.write_u8(0);
    writer.write_u32(info.sample_rate);
    writer.write_offset(info.loop_start);
    writer.write_offset(layout.sample_count);
    writer.write_offset(blocks.interleave_count);
    writer.write_offset(blocks.interleave_size);
    writer.write_offset(blocks.samples_per_interleave);
    writer.write_offset(blocks.last_block_size_without_padding);
    writer.write_offset(blocks.last_block_samples);
    writer.write_offset(blocks.last_block_size);
    writer.write_offset(BYTES_PER_ENTRY);
    writer.write_offset(layout.samples_per_seek_entry);
    write_reference(writer, SAMPLE_DATA_REFERENCE, DATA_HEADER_LENGTH - CHUNK_HEADER_LENGTH);
    writer.write_u16(0);
    writer.write_u16(0);

    let first_track = 4 + 8 * layout.track_count;
    writer.write_offset(layout.track_count);
    for i in 0..layout.track_count {
        write_reference(writer, TRACK_INFO_REFERENCE, first_track + TRACK_INFO_LENGTH * i);
    }
    for track in audio.tracks() {
        writer.write_u8(track.volume);
        writer.write_u8(track.panning);
        writer.write_u16(0);
        write_reference(writer, BYTE_TABLE_REFERENCE, 0x0C);
        writer.write_offset(track.channel_count);
        writer.write_u8(track.channel_left as u8);
        writer.write_u8(track.channel_right as u8);
        writer.write_u16(0);
    }

    let first_channel = 4 + 8 * layout.channel_count;
    writer.write_offset(layout.channel_count);
    for i in 0..layout.channel_count {
        write_reference(writer, CHANNEL_INFO_REFERENCE, first_channel + CHANNEL_INFO_LENGTH * i);
    }

    let loop_contexts = loop_contexts(audio);
    for (channel, context) in audio.channels().iter().zip(loop_contexts) {
        write_reference(writer, ADPCM_INFO_REFERENCE, 8);
        writer.write_coefficients(&channel.coefficients);
        writer.write_i16(channel.predictor_scale() as i16);
        writer.write_i16(channel.hist_1);
        writer.write_i16(channel.hist_2);
        writer.write_i16(context.predictor_scale as i16);
        writer.write_i16(context.hist_1);
        writer.write_i16(context.hist_2);
        writer.write_i16(channel.gain);
        writer.write_u16(0);
    }

    writer.pad_to_len(layout.seek_offset());
}

fn write_seek_chunk(
    writer: &mut ByteWriter,
    layout: &BcfstmLayout,
    audio: &GcAdpcmFormat,
    config: &Configuration,
) {
    write_chunk_header(writer, b"SEEK", layout.seek_length);

    let tables = audio.seek_tables(
        layout.samples_per_seek_entry,
        layout.seek_entry_count,
        config.recalculate_seek_table(),
    );
    writer.write_bytes(&tables_to_bytes(&tables, writer.endianness()));
    writer.pad_to_len(layout.data_offset());
}

fn write_data_chunk(
    writer: &mut ByteWriter,
    layout: &BcfstmLayout,
    audio: &GcAdpcmFormat,
) -> Result<()> {
    write_chunk_header(writer, b"DATA", layout.data_length);
    writer.pad_to_len(layout.data_offset() + DATA_HEADER_LENGTH);

    let channels: Vec<&Bytes> = audio.channels().iter().map(GcAdpcmChannel::audio).collect();
    let blocks = &layout.blocks;
    writer.write_bytes(&interleave(&channels, blocks.interleave_size, blocks.last_block_size)?);
    Ok(())
}

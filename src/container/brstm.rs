//! RSTM (`.brstm`) streams.
//!
//! ```text
//! 0x00  RSTM header: magic, byte order mark, version, file length,
//!       header length, and (offset, length) for HEAD, ADPC and DATA
//! 0x40  HEAD  stream info, track table, channel table with coefficients
//!       ADPC  seek table, entries interleaved by channel
//!       DATA  0x20-byte chunk header, then the interleaved audio
//! ```
//!
//! Offsets inside HEAD are relative to the end of its 8-byte chunk header.
//! Every chunk is padded to 0x20 bytes. Loop ends are not stored: a looping
//! stream ends at its loop end.

use bytes::Bytes;
use tracing::{debug, warn};

use super::{
    binary::{ByteReader, ByteWriter, Endianness},
    finish, loop_contexts, write_chunk_header, BlockLayout, ChunkEntry, ChunkSpec, ChunkTag,
    ContainerFrame, ContainerKind,
};
use crate::{
    channel::GcAdpcmChannel,
    config::{Configuration, HeaderVariant, SeekTableType},
    error::{Error, HeaderError, Result},
    format::AudioFormat,
    gc_adpcm::{GcAdpcmFormat, GcAdpcmTrack},
    interleave::{deinterleave, interleave, InterleaveLayout},
    loop_context::LoopContext,
    math::{get_next_multiple, sample_count_to_frame_bytes},
    seek_table::{entry_count, tables_from_bytes, tables_to_bytes, SeekTable, BYTES_PER_ENTRY},
};

const CODEC_GC_ADPCM: u8 = 2;
const VERSION: u16 = 0x0100;
const ALIGNMENT: usize = 0x20;

const RSTM_HEADER_LENGTH: usize = 0x40;
const CHUNK_HEADER_LENGTH: usize = 8;
const HEAD_TABLE_LENGTH: usize = 8 * 3;
const STREAM_INFO_LENGTH: usize = 0x34;
const CHANNEL_INFO_LENGTH: usize = 0x38;
const DATA_HEADER_LENGTH: usize = 0x20;

const REFERENCE_MARKER: u32 = 0x0100_0000;
const STANDARD_TRACK_MARKER: u32 = 0x0101_0000;

fn track_info_length(variant: HeaderVariant) -> usize {
    match variant {
        HeaderVariant::Ssbb => 4,
        HeaderVariant::Standard => 0x0C,
    }
}

/// Fields of the first HEAD sub-chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StreamInfo {
    looping: bool,
    channel_count: usize,
    sample_rate: u32,
    loop_start: usize,
    sample_count: usize,
    audio_data_offset: usize,
    blocks: BlockLayout,
    samples_per_seek_entry: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ChannelInfo {
    coefficients: [i16; 16],
    gain: i16,
    hist_1: i16,
    hist_2: i16,
    loop_predictor_scale: i16,
    loop_hist_1: i16,
    loop_hist_2: i16,
}

#[derive(Debug, Clone, Default)]
struct Head {
    info: StreamInfo,
    header_variant: HeaderVariant,
    tracks: Vec<GcAdpcmTrack>,
    channels: Vec<ChannelInfo>,
}

#[derive(Debug, Default)]
pub(crate) struct BrstmFrame {
    head: Option<Head>,
    seek_tables: Option<(SeekTableType, Vec<SeekTable>)>,
    audio: Option<Vec<Vec<u8>>>,
}

const CHUNKS: &[ChunkSpec<BrstmFrame>] = &[
    ChunkSpec {
        name: "HEAD",
        magic: Some(b"HEAD"),
        id: None,
        required: true,
        parse: BrstmFrame::parse_head,
    },
    ChunkSpec {
        name: "ADPC",
        magic: Some(b"ADPC"),
        id: None,
        required: false,
        parse: BrstmFrame::parse_adpc,
    },
    ChunkSpec {
        name: "DATA",
        magic: Some(b"DATA"),
        id: None,
        required: true,
        parse: BrstmFrame::parse_data,
    },
];

impl BrstmFrame {
    fn head(&self) -> Result<&Head> {
        self.head.as_ref().ok_or(HeaderError::MissingChunk { chunk: "HEAD" }.into())
    }

    fn parse_head(reader: &mut ByteReader, entry: ChunkEntry, frame: &mut Self) -> Result<()> {
        let base = entry.offset + CHUNK_HEADER_LENGTH;

        let mut sub_chunks = [0usize; 3];
        for offset in &mut sub_chunks {
            reader.skip(4)?;
            *offset = reader.read_offset()?;
        }

        reader.set_position(base + sub_chunks[0])?;
        let info = read_stream_info(reader)?;

        reader.set_position(base + sub_chunks[1])?;
        let track_count = reader.read_u8()? as usize;
        let header_variant = match reader.read_u8()? {
            0 => HeaderVariant::Ssbb,
            _ => HeaderVariant::Standard,
        };
        reader.skip(2)?;

        let mut track_offsets = Vec::with_capacity(track_count);
        for _ in 0..track_count {
            reader.skip(4)?;
            track_offsets.push(reader.read_offset()?);
        }

        let mut tracks = Vec::with_capacity(track_count);
        for offset in track_offsets {
            reader.set_position(base + offset)?;
            let mut track = GcAdpcmTrack::default();
            if header_variant == HeaderVariant::Standard {
                track.volume = reader.read_u8()?;
                track.panning = reader.read_u8()?;
                reader.skip(6)?;
            }
            track.channel_count = reader.read_u8()? as usize;
            track.channel_left = reader.read_u8()? as usize;
            track.channel_right = reader.read_u8()? as usize;
            tracks.push(track);
        }

        reader.set_position(base + sub_chunks[2])?;
        let channel_count = reader.read_u8()? as usize;
        reader.skip(3)?;

        if channel_count != info.channel_count {
            return Err(Error::invalid_field("channel table count", channel_count as i64));
        }

        let mut channel_offsets = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            reader.skip(4)?;
            channel_offsets.push(reader.read_offset()?);
        }

        let mut channels = Vec::with_capacity(channel_count);
        for offset in channel_offsets {
            reader.set_position(base + offset + 4)?;
            let coefficients_offset = reader.read_offset()?;
            reader.set_position(base + coefficients_offset)?;

            let coefficients = reader.read_coefficients()?;
            let gain = reader.read_i16()?;
            // The initial predictor/scale repeats the first audio byte.
            reader.skip(2)?;

            channels.push(ChannelInfo {
                coefficients,
                gain,
                hist_1: reader.read_i16()?,
                hist_2: reader.read_i16()?,
                loop_predictor_scale: reader.read_i16()?,
                loop_hist_1: reader.read_i16()?,
                loop_hist_2: reader.read_i16()?,
            });
        }

        frame.head = Some(Head { info, header_variant, tracks, channels });
        Ok(())
    }

    fn parse_adpc(reader: &mut ByteReader, entry: ChunkEntry, frame: &mut Self) -> Result<()> {
        let info = &frame.head()?.info;
        let (channel_count, sample_count, samples_per_entry) =
            (info.channel_count, info.sample_count, info.samples_per_seek_entry);
        if samples_per_entry < 2 {
            let samples = samples_per_entry as i64;
            return Err(Error::invalid_field("samples per seek entry", samples));
        }
        let bytes_per_entry = BYTES_PER_ENTRY * channel_count;

        for table_type in [SeekTableType::Standard, SeekTableType::Short] {
            let count = entry_count(sample_count, samples_per_entry, table_type);
            let table_length = count * bytes_per_entry;

            // The chunk adds an 8-byte header and pads to 0x20.
            if (entry.length as i64 - table_length as i64 - 0x14).abs() < 0x14 {
                let table = reader.read_bytes(table_length)?;
                let endianness = reader.endianness();
                let tables =
                    tables_from_bytes(&table, channel_count, samples_per_entry, endianness);
                frame.seek_tables = Some((table_type, tables));
                return Ok(());
            }
        }

        warn!(length = entry.length, "seek table matches no known size, ignoring it");
        Ok(())
    }

    fn parse_data(reader: &mut ByteReader, entry: ChunkEntry, frame: &mut Self) -> Result<()> {
        let info = frame.head()?.info.clone();
        let blocks = info.blocks;
        let channel_length = sample_count_to_frame_bytes(info.sample_count);
        let layout =
            InterleaveLayout::new(channel_length, blocks.interleave_size, blocks.last_block_size)?;
        let audio_length = layout.total_length(info.channel_count);

        let audio_data_offset = info.audio_data_offset;
        let chunk_start = entry.offset + CHUNK_HEADER_LENGTH;
        let chunk_end = entry.offset + entry.length;
        if audio_data_offset < chunk_start || audio_data_offset + audio_length > chunk_end {
            return Err(Error::invalid_field("audio data offset", audio_data_offset as i64));
        }

        reader.set_position(audio_data_offset)?;
        let audio = reader.read_bytes(audio_length)?;
        let channels = deinterleave(
            &audio,
            blocks.interleave_size,
            blocks.last_block_size,
            info.channel_count,
            channel_length,
        )?;

        frame.audio = Some(channels);
        Ok(())
    }
}

fn read_stream_info(reader: &mut ByteReader) -> Result<StreamInfo> {
    let codec = reader.read_u8()?;
    if codec != CODEC_GC_ADPCM {
        return Err(Error::UnsupportedCodec(codec));
    }

    let looping = reader.read_u8()? == 1;
    let channel_count = reader.read_u8()? as usize;
    reader.skip(1)?;
    let sample_rate = reader.read_u16()? as u32;
    reader.skip(2)?;

    Ok(StreamInfo {
        looping,
        channel_count,
        sample_rate,
        loop_start: reader.read_offset()?,
        sample_count: reader.read_offset()?,
        audio_data_offset: reader.read_offset()?,
        blocks: BlockLayout {
            interleave_count: reader.read_offset()?,
            interleave_size: reader.read_offset()?,
            samples_per_interleave: reader.read_offset()?,
            last_block_size_without_padding: reader.read_offset()?,
            last_block_samples: reader.read_offset()?,
            last_block_size: reader.read_offset()?,
        },
        samples_per_seek_entry: reader.read_offset()?,
    })
}

impl ContainerFrame for BrstmFrame {
    const KIND: ContainerKind = ContainerKind::Brstm;
    const ENDIANNESS: Endianness = Endianness::Big;

    fn chunks() -> &'static [ChunkSpec<Self>] {
        CHUNKS
    }

    fn read_header(&mut self, reader: &mut ByteReader) -> Result<()> {
        let endianness = match reader.read_u16()? {
            0xFEFF => Endianness::Big,
            0xFFFE => Endianness::Little,
            mark => return Err(Error::invalid_field("byte order mark", mark as i64)),
        };
        reader.set_endianness(endianness);

        let _version = reader.read_u16()?;
        let file_length = reader.read_offset()?;
        if file_length != reader.len() {
            let actual = reader.len();
            return Err(HeaderError::FileLengthMismatch { declared: file_length, actual }.into());
        }

        Ok(())
    }

    fn read_offset_table(&mut self, reader: &mut ByteReader) -> Result<Vec<ChunkEntry>> {
        let _header_length = reader.read_u16()?;
        let _entry_count = reader.read_u16()?;

        let mut entries = Vec::with_capacity(3);
        for _ in 0..3 {
            let offset = reader.read_offset()?;
            let length = reader.read_offset()?;
            if offset != 0 {
                entries.push(ChunkEntry { offset, length, tag: ChunkTag::Magic });
            }
        }
        Ok(entries)
    }

    fn validate(&self) -> Result<()> {
        let head = self.head()?;
        let info = &head.info;
        info.blocks.check(info.sample_count)?;

        if self.audio.as_ref().map_or(0, Vec::len) != head.channels.len() {
            return Err(Error::invalid_field("channel count", info.channel_count as i64));
        }

        Ok(())
    }

    fn build(self) -> Result<(GcAdpcmFormat, Configuration)> {
        let Head { info, header_variant, tracks, channels } = match self.head {
            Some(head) => head,
            None => return Err(HeaderError::MissingChunk { chunk: "HEAD" }.into()),
        };
        let audio = self.audio.unwrap_or_default();

        let (seek_table_type, mut seek_tables) = match self.seek_tables {
            Some((table_type, tables)) => (table_type, tables.into_iter().map(Some).collect()),
            None => (SeekTableType::Standard, vec![None; channels.len()]),
        };

        let configuration = Configuration::builder()
            .samples_per_interleave(info.blocks.samples_per_interleave)
            .samples_per_seek_entry(info.samples_per_seek_entry)
            .header_variant(header_variant)
            .seek_table_type(seek_table_type)
            .recalculate_seek_table(seek_tables.iter().any(Option::is_none))
            .build()?;

        let channels = channels
            .into_iter()
            .zip(audio)
            .zip(seek_tables.iter_mut())
            .map(|((channel, audio), seek_table)| {
                let mut built =
                    GcAdpcmChannel::new(audio, channel.coefficients, info.sample_count)?
                        .with_gain(channel.gain)
                        .with_history(channel.hist_1, channel.hist_2);

                if let Some(table) = seek_table.take() {
                    built = built.with_seek_table(table);
                }
                if info.looping {
                    built = built.with_loop_context(LoopContext {
                        loop_start: info.loop_start,
                        predictor_scale: channel.loop_predictor_scale as u8,
                        hist_1: channel.loop_hist_1,
                        hist_2: channel.loop_hist_2,
                    });
                }
                Ok(built)
            })
            .collect::<Result<Vec<_>>>()?;

        let audio = GcAdpcmFormat::builder(info.sample_rate, channels)
            .tracks(tracks)
            .with_loop(info.looping, info.loop_start, info.sample_count)
            .build()?;

        Ok((audio, configuration))
    }
}

/// Every size and offset of a file, derived before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BrstmLayout {
    channel_count: usize,
    track_count: usize,
    sample_count: usize,
    header_variant: HeaderVariant,
    blocks: BlockLayout,
    samples_per_seek_entry: usize,
    seek_entry_count: usize,
    head_length: usize,
    adpc_length: usize,
    data_length: usize,
}

impl BrstmLayout {
    fn new(audio: &GcAdpcmFormat, config: &Configuration) -> Self {
        let channel_count = audio.channel_count();
        let track_count = audio.tracks().len();
        let sample_count = audio.info().sample_count;
        let header_variant = config.header_variant();
        let blocks = BlockLayout::new(sample_count, config.samples_per_interleave());

        let samples_per_seek_entry = config.samples_per_seek_entry();
        let seek_entry_count =
            entry_count(sample_count, samples_per_seek_entry, config.seek_table_type());

        let sub_chunk_2_length = 4 + (8 + track_info_length(header_variant)) * track_count;
        let sub_chunk_3_length = 4 + (8 + CHANNEL_INFO_LENGTH) * channel_count;
        let head_length = get_next_multiple(
            CHUNK_HEADER_LENGTH
                + HEAD_TABLE_LENGTH
                + STREAM_INFO_LENGTH
                + sub_chunk_2_length
                + sub_chunk_3_length,
            ALIGNMENT,
        );

        let adpc_length = get_next_multiple(
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
            header_variant,
            blocks,
            samples_per_seek_entry,
            seek_entry_count,
            head_length,
            adpc_length,
            data_length,
        }
    }

    fn head_offset(&self) -> usize {
        RSTM_HEADER_LENGTH
    }

    fn adpc_offset(&self) -> usize {
        self.head_offset() + self.head_length
    }

    fn data_offset(&self) -> usize {
        self.adpc_offset() + self.adpc_length
    }

    fn audio_data_offset(&self) -> usize {
        self.data_offset() + DATA_HEADER_LENGTH
    }

    fn file_length(&self) -> usize {
        self.data_offset() + self.data_length
    }

    fn sub_chunk_2_offset(&self) -> usize {
        HEAD_TABLE_LENGTH + STREAM_INFO_LENGTH
    }

    fn sub_chunk_3_offset(&self) -> usize {
        self.sub_chunk_2_offset()
            + 4
            + (8 + track_info_length(self.header_variant)) * self.track_count
    }
}

pub(crate) fn write(audio: &GcAdpcmFormat, config: &Configuration) -> Result<Bytes> {
    write_with_endianness(audio, config, Endianness::Big)
}

/// Writes with the byte order mark and every multi-byte field in
/// `endianness`. Consoles only read big-endian files.
fn write_with_endianness(
    audio: &GcAdpcmFormat,
    config: &Configuration,
    endianness: Endianness,
) -> Result<Bytes> {
    let trimmed;
    let audio = if audio.info().looping {
        trimmed = audio.truncated(audio.info().loop_end)?;
        &trimmed
    } else {
        audio
    };

    let info = audio.info();
    if info.sample_rate > u16::MAX as u32 {
        let rate = info.sample_rate as usize;
        return Err(Error::out_of_range("sample_rate", rate, "RSTM stores 16 bits"));
    }
    if audio.channel_count() > u8::MAX as usize {
        let count = audio.channel_count();
        return Err(Error::out_of_range("channel count", count, "RSTM stores 8 bits"));
    }
    if audio.tracks().len() > u8::MAX as usize {
        let count = audio.tracks().len();
        return Err(Error::out_of_range("track count", count, "RSTM stores 8 bits"));
    }

    let layout = BrstmLayout::new(audio, config);
    debug!(
        channels = layout.channel_count,
        samples = layout.sample_count,
        interleave_count = layout.blocks.interleave_count,
        seek_entries = layout.seek_entry_count,
        file_length = layout.file_length(),
        ?endianness,
        "writing brstm"
    );

    let mut writer = ByteWriter::with_capacity(layout.file_length(), endianness);
    write_rstm_header(&mut writer, &layout);
    write_head_chunk(&mut writer, &layout, audio);
    write_adpc_chunk(&mut writer, &layout, audio, config);
    write_data_chunk(&mut writer, &layout, audio)?;

    Ok(finish(writer, ContainerKind::Brstm, layout.file_length()))
}

fn write_rstm_header(writer: &mut ByteWriter, layout: &BrstmLayout) {
    writer.write_bytes(ContainerKind::Brstm.magic());
    writer.write_u16(0xFEFF);
    writer.write_u16(VERSION);
    writer.write_offset(layout.file_length());
    writer.write_u16(RSTM_HEADER_LENGTH as u16);
    writer.write_u16(2);
    writer.write_offset(layout.head_offset());
    writer.write_offset(layout.head_length);
    writer.write_offset(layout.adpc_offset());
    writer.write_offset(layout.adpc_length);
    writer.write_offset(layout.data_offset());
    writer.write_offset(layout.data_length);
    writer.pad_to_len(RSTM_HEADER_LENGTH);
}

fn write_head_chunk(writer: &mut ByteWriter, layout: &BrstmLayout, audio: &GcAdpcmFormat) {
    let info = audio.info();
    let blocks = &layout.blocks;
    write_chunk_header(writer, b"HEAD", layout.head_length);

    let sub_chunks = [HEAD_TABLE_LENGTH, layout.sub_chunk_2_offset(), layout.sub_chunk_3_offset()];
    for offset in sub_chunks {
        writer.write_u32(REFERENCE_MARKER);
        writer.write_offset(offset);
    }

    writer.write_u8(CODEC_GC_ADPCM);
    writer.write_u8(info.looping as u8);
    writer.write_u8(layout.channel_count as u8);
    writer.write_u8(0);
    writer.write_u16(info.sample_rate as u16);
    writer.write_u16(0);
    writer.write_offset(info.loop_start);
    writer.write_offset(layout.sample_count);
    writer.write_offset(layout.audio_data_offset());
    writer.write_offset(blocks.interleave_count);
    writer.write_offset(blocks.interleave_size);
    writer.write_offset(blocks.samples_per_interleave);
    writer.write_offset(blocks.last_block_size_without_padding);
    writer.write_offset(blocks.last_block_samples);
    writer.write_offset(blocks.last_block_size);
    writer.write_offset(layout.samples_per_seek_entry);
    writer.write_offset(BYTES_PER_ENTRY);

    let (marker, variant_flag) = match layout.header_variant {
        HeaderVariant::Ssbb => (REFERENCE_MARKER, 0),
        HeaderVariant::Standard => (STANDARD_TRACK_MARKER, 1),
    };
    let track_info_length = track_info_length(layout.header_variant);
    let tracks_base = layout.sub_chunk_2_offset() + 4 + 8 * layout.track_count;

    writer.write_u8(layout.track_count as u8);
    writer.write_u8(variant_flag);
    writer.write_u16(0);
    for i in 0..layout.track_count {
        writer.write_u32(marker);
        writer.write_offset(tracks_base + track_info_length * i);
    }
    for track in audio.tracks() {
        if layout.header_variant == HeaderVariant::Standard {
            writer.write_u8(track.volume);
            writer.write_u8(track.panning);
            writer.write_u16(0);
            writer.write_u32(0);
        }
        writer.write_u8(track.channel_count as u8);
        writer.write_u8(track.channel_left as u8);
        writer.write_u8(track.channel_right as u8);
        writer.write_u8(0);
    }

    let channels_base = layout.sub_chunk_3_offset() + 4 + 8 * layout.channel_count;
    writer.write_u8(layout.channel_count as u8);
    writer.write_u8(0);
    writer.write_u16(0);
    for i in 0..layout.channel_count {
        writer.write_u32(REFERENCE_MARKER);
        writer.write_offset(channels_base + CHANNEL_INFO_LENGTH * i);
    }

    let loop_contexts = loop_contexts(audio);
    for (i, (channel, context)) in audio.channels().iter().zip(loop_contexts).enumerate() {
        writer.write_u32(REFERENCE_MARKER);
        writer.write_offset(channels_base + CHANNEL_INFO_LENGTH * i + 8);
        writer.write_coefficients(&channel.coefficients);
        writer.write_i16(channel.gain);
        writer.write_i16(channel.predictor_scale() as i16);
        writer.write_i16(channel.hist_1);
        writer.write_i16(channel.hist_2);
        writer.write_i16(context.predictor_scale as i16);
        writer.write_i16(context.hist_1);
        writer.write_i16(context.hist_2);
        writer.write_u16(0);
    }

    writer.pad_to_len(layout.adpc_offset());
}

fn write_adpc_chunk(
    writer: &mut ByteWriter,
    layout: &BrstmLayout,
    audio: &GcAdpcmFormat,
    config: &Configuration,
) {
    write_chunk_header(writer, b"ADPC", layout.adpc_length);

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
    layout: &BrstmLayout,
    audio: &GcAdpcmFormat,
) -> Result<()> {
    write_chunk_header(writer, b"DATA", layout.data_length);
    writer.write_u32(0x18);
    writer.pad_to_len(layout.audio_data_offset());

    let channels: Vec<&Bytes> = audio.channels().iter().map(GcAdpcmChannel::audio).collect();
    let blocks = &layout.blocks;
    writer.write_bytes(&interleave(&channels, blocks.interleave_size, blocks.last_block_size)?);
    Ok(())
}

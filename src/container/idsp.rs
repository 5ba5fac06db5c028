//! IDSP streams.
//!
//! A 0x40-byte stream header, one 0x60-byte record per channel, then the
//! audio. Nothing after the magic is tagged: the header gives the offset and
//! size of every region directly.
//!
//! ```text
//! 0x00  "IDSP", 0, channels, rate, samples, loop start, loop end,
//!       interleave, stream info size, channel info size, header size,
//!       audio data size (per channel)
//! 0x40  channel records
//! ....  audio, interleaved when the interleave field is non-zero
//! ```

use bytes::Bytes;
use tracing::trace;

use super::{
    binary::{ByteReader, ByteWriter, Endianness},
    finish, loop_contexts, ChunkEntry, ChunkSpec, ChunkTag, ContainerFrame, ContainerKind,
};
use crate::{
    channel::GcAdpcmChannel,
    config::Configuration,
    error::{Error, HeaderError, Result},
    format::AudioFormat,
    gc_adpcm::GcAdpcmFormat,
    interleave::{deinterleave, interleave},
    loop_context::LoopContext,
    math::{
        get_next_multiple, sample_count_to_byte_count, sample_count_to_frame_bytes,
        sample_count_to_nibble_count, sample_to_nibble,
    },
    BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};

const STREAM_INFO_SIZE: usize = 0x40;
const CHANNEL_INFO_SIZE: usize = 0x60;
/// Bytes of a channel record that carry fields.
const CHANNEL_INFO_FIELDS: usize = 0x4A;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IdspHeader {
    channel_count: usize,
    sample_rate: u32,
    sample_count: usize,
    loop_start: usize,
    loop_end: usize,
    interleave_size: usize,
    stream_info_size: usize,
    channel_info_size: usize,
    header_size: usize,
    audio_data_size: usize,
}

impl IdspHeader {
    fn block_size(&self) -> usize {
        match self.interleave_size {
            0 => self.audio_data_size,
            size => size,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GcAdpcmContext {
    predictor_scale: i16,
    hist_1: i16,
    hist_2: i16,
}

impl GcAdpcmContext {
    fn read_from(reader: &mut ByteReader) -> Result<Self> {
        let predictor_scale = reader.read_i16()?;
        let hist_1 = reader.read_i16()?;
        let hist_2 = reader.read_i16()?;

        Ok(Self { predictor_scale, hist_1, hist_2 })
    }
}

#[derive(Debug, Clone, Default)]
struct ChannelMetadata {
    sample_count: usize,
    nibble_count: usize,
    sample_rate: u32,
    looping: bool,
    start_address: usize,
    end_address: usize,
    coefficients: [i16; 16],
    gain: i16,
    start_context: GcAdpcmContext,
    loop_context: GcAdpcmContext,
}

#[derive(Debug, Default)]
pub(crate) struct IdspFrame {
    header: IdspHeader,
    channels: Vec<ChannelMetadata>,
    audio: Vec<Vec<u8>>,
}

const CHUNKS: &[ChunkSpec<IdspFrame>] = &[
    ChunkSpec {
        name: "channel info",
        magic: None,
        id: None,
        required: true,
        parse: IdspFrame::parse_channel_info,
    },
    ChunkSpec {
        name: "audio data",
        magic: None,
        id: None,
        required: true,
        parse: IdspFrame::parse_audio,
    },
];

impl IdspFrame {
    fn parse_channel_info(
        reader: &mut ByteReader,
        entry: ChunkEntry,
        frame: &mut Self,
    ) -> Result<()> {
        let header = frame.header;

        for i in 0..header.channel_count {
            reader.set_position(entry.offset + i * header.channel_info_size)?;

            let sample_count = reader.read_offset()?;
            let nibble_count = reader.read_offset()?;
            let sample_rate = reader.read_u32()?;
            let looping = reader.read_i16()? == 1;
            reader.skip(2)?;
            let start_address = reader.read_offset()?;
            let end_address = reader.read_offset()?;
            // Current address; always the first nibble on disk.
            reader.skip(4)?;
            let coefficients = reader.read_coefficients()?;
            let gain = reader.read_i16()?;
            let start_context = GcAdpcmContext::read_from(reader)?;
            let loop_context = GcAdpcmContext::read_from(reader)?;

            trace!(
                channel = i,
                start_address,
                end_address,
                predictor_scale = start_context.predictor_scale,
                "idsp channel record"
            );

            frame.channels.push(ChannelMetadata {
                sample_count,
                nibble_count,
                sample_rate,
                looping,
                start_address,
                end_address,
                coefficients,
                gain,
                start_context,
                loop_context,
            });
        }

        Ok(())
    }

    fn parse_audio(reader: &mut ByteReader, entry: ChunkEntry, frame: &mut Self) -> Result<()> {
        let header = frame.header;
        if header.interleave_size % BYTES_PER_FRAME != 0 {
            return Err(Error::invalid_field("interleave size", header.interleave_size as i64));
        }

        let channel_length = sample_count_to_frame_bytes(header.sample_count);
        if header.audio_data_size < channel_length {
            return Err(Error::invalid_field("audio data size", header.audio_data_size as i64));
        }

        reader.set_position(entry.offset)?;
        let audio = reader.read_bytes(entry.length)?;
        frame.audio = deinterleave(
            &audio,
            header.block_size(),
            header.block_size(),
            header.channel_count,
            channel_length,
        )?;

        Ok(())
    }
}

impl ContainerFrame for IdspFrame {
    const KIND: ContainerKind = ContainerKind::Idsp;
    const ENDIANNESS: Endianness = Endianness::Big;

    fn chunks() -> &'static [ChunkSpec<Self>] {
        CHUNKS
    }

    fn read_header(&mut self, reader: &mut ByteReader) -> Result<()> {
        reader.skip(4)?;

        let header = IdspHeader {
            channel_count: reader.read_offset()?,
            sample_rate: reader.read_u32()?,
            sample_count: reader.read_offset()?,
            loop_start: reader.read_offset()?,
            loop_end: reader.read_offset()?,
            interleave_size: reader.read_offset()?,
            stream_info_size: reader.read_offset()?,
            channel_info_size: reader.read_offset()?,
            header_size: reader.read_offset()?,
            audio_data_size: reader.read_offset()?,
        };

        if header.channel_info_size < CHANNEL_INFO_FIELDS {
            let size = header.channel_info_size as i64;
            return Err(Error::invalid_field("channel info size", size));
        }

        let file_length = header
            .audio_data_size
            .checked_mul(header.channel_count)
            .and_then(|audio| audio.checked_add(header.header_size))
            .ok_or(Error::invalid_field("audio data size", header.audio_data_size as i64))?;
        if file_length != reader.len() {
            let actual = reader.len();
            return Err(HeaderError::FileLengthMismatch { declared: file_length, actual }.into());
        }

        self.header = header;
        Ok(())
    }

    fn read_offset_table(&mut self, _reader: &mut ByteReader) -> Result<Vec<ChunkEntry>> {
        let header = &self.header;
        Ok(vec![
            ChunkEntry {
                offset: header.stream_info_size,
                length: header.channel_count * header.channel_info_size,
                tag: ChunkTag::Position,
            },
            ChunkEntry {
                offset: header.header_size,
                length: header.channel_count * header.audio_data_size,
                tag: ChunkTag::Position,
            },
        ])
    }

    fn validate(&self) -> Result<()> {
        let header = &self.header;
        let nibble_count = sample_count_to_nibble_count(header.sample_count);

        for channel in &self.channels {
            if channel.sample_count != header.sample_count {
                let count = channel.sample_count as i64;
                return Err(Error::invalid_field("channel sample count", count));
            }
            if channel.nibble_count != nibble_count {
                let count = channel.nibble_count as i64;
                return Err(Error::invalid_field("channel nibble count", count));
            }
            if channel.sample_rate != header.sample_rate {
                let rate = channel.sample_rate as i64;
                return Err(Error::invalid_field("channel sample rate", rate));
            }

            if !channel.looping {
                continue;
            }
            if channel.start_address != sample_to_nibble(header.loop_start) {
                let address = channel.start_address as i64;
                return Err(Error::invalid_field("loop start address", address));
            }
            if channel.end_address != sample_to_nibble(header.loop_end) {
                let address = channel.end_address as i64;
                return Err(Error::invalid_field("loop end address", address));
            }
        }

        Ok(())
    }

    fn build(self) -> Result<(GcAdpcmFormat, Configuration)> {
        let header = self.header;
        let looping = self.channels.iter().any(|c| c.looping);

        let samples_per_interleave = match header.interleave_size {
            0 => get_next_multiple(header.sample_count, SAMPLES_PER_FRAME).max(SAMPLES_PER_FRAME),
            size => size / BYTES_PER_FRAME * SAMPLES_PER_FRAME,
        };
        let configuration =
            Configuration::builder().samples_per_interleave(samples_per_interleave).build()?;

        let channels = self
            .channels
            .into_iter()
            .zip(self.audio)
            .map(|(channel, audio)| {
                let built = GcAdpcmChannel::new(audio, channel.coefficients, header.sample_count)?
                    .with_gain(channel.gain)
                    .with_history(channel.start_context.hist_1, channel.start_context.hist_2);

                if !looping {
                    return Ok(built);
                }
                Ok(built.with_loop_context(LoopContext {
                    loop_start: header.loop_start,
                    predictor_scale: channel.loop_context.predictor_scale as u8,
                    hist_1: channel.loop_context.hist_1,
                    hist_2: channel.loop_context.hist_2,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        let audio = GcAdpcmFormat::builder(header.sample_rate, channels)
            .with_loop(looping, header.loop_start, header.loop_end)
            .build()?;

        Ok((audio, configuration))
    }
}

impl IdspHeader {
    fn for_stream(audio: &GcAdpcmFormat, config: &Configuration) -> Self {
        let info = audio.info();
        let channel_count = audio.channel_count();

        let samples_per_interleave = config.samples_per_interleave();
        // A single block holds the whole channel.
        let interleave_size = if samples_per_interleave >= info.sample_count {
            0
        } else {
            samples_per_interleave / SAMPLES_PER_FRAME * BYTES_PER_FRAME
        };

        let audio_data_size = get_next_multiple(
            sample_count_to_byte_count(info.sample_count),
            match interleave_size {
                0 => BYTES_PER_FRAME,
                size => size,
            },
        );

        Self {
            channel_count,
            sample_rate: info.sample_rate,
            sample_count: info.sample_count,
            loop_start: info.loop_start,
            loop_end: info.loop_end,
            interleave_size,
            stream_info_size: STREAM_INFO_SIZE,
            channel_info_size: CHANNEL_INFO_SIZE,
            header_size: STREAM_INFO_SIZE + channel_count * CHANNEL_INFO_SIZE,
            audio_data_size,
        }
    }

    fn file_length(&self) -> usize {
        self.header_size + self.audio_data_size * self.channel_count
    }
}

pub(crate) fn write(audio: &GcAdpcmFormat, config: &Configuration) -> Result<Bytes> {
    let info = audio.info();
    let header = IdspHeader::for_stream(audio, config);
    trace!(?header, "writing idsp");

    let mut writer = ByteWriter::with_capacity(header.file_length(), Endianness::Big);
    writer.write_bytes(ContainerKind::Idsp.magic());
    writer.write_u32(0);
    writer.write_offset(header.channel_count);
    writer.write_u32(header.sample_rate);
    writer.write_offset(header.sample_count);
    writer.write_offset(header.loop_start);
    writer.write_offset(header.loop_end);
    writer.write_offset(header.interleave_size);
    writer.write_offset(header.stream_info_size);
    writer.write_offset(header.channel_info_size);
    writer.write_offset(header.header_size);
    writer.write_offset(header.audio_data_size);
    writer.pad_to_len(STREAM_INFO_SIZE);

    let (start_address, end_address) = if info.looping {
        (sample_to_nibble(info.loop_start), sample_to_nibble(info.loop_end))
    } else {
        (sample_to_nibble(0), sample_to_nibble(info.sample_count.saturating_sub(1)))
    };

    let contexts = loop_contexts(audio);
    for (i, (channel, context)) in audio.channels().iter().zip(contexts).enumerate() {
        writer.write_offset(header.sample_count);
        writer.write_offset(sample_count_to_nibble_count(header.sample_count));
        writer.write_u32(header.sample_rate);
        writer.write_i16(info.looping as i16);
        writer.write_i16(0);
        writer.write_offset(start_address);
        writer.write_offset(end_address);
        writer.write_offset(sample_to_nibble(0));
        writer.write_coefficients(&channel.coefficients);
        writer.write_i16(channel.gain);
        writer.write_i16(channel.predictor_scale() as i16);
        writer.write_i16(channel.hist_1);
        writer.write_i16(channel.hist_2);
        writer.write_i16(context.predictor_scale as i16);
        writer.write_i16(context.hist_1);
        writer.write_i16(context.hist_2);
        writer.pad_to_len(STREAM_INFO_SIZE + (i + 1) * CHANNEL_INFO_SIZE);
    }

    let channels: Vec<&Bytes> = audio.channels().iter().map(GcAdpcmChannel::audio).collect();
    writer.write_bytes(&interleave(&channels, header.block_size(), header.block_size())?);

    Ok(finish(writer, ContainerKind::Idsp, header.file_length()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        container::{parse, parse_container},
        format::Pcm16Format,
    };

    fn noise(count: usize, seed: u32) -> Vec<i16> {
        let mut state = seed;
        let mut last = 0i32;
        (0..count)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                last = (last + ((state >> 16) as i32 % 2048) - 1024).clamp(-20000, 20000);
                last as i16
            })
            .collect()
    }

    fn stream(channels: usize, count: usize) -> GcAdpcmFormat {
        let pcm = (0..channels).map(|c| noise(count, 7 + c as u32)).collect();
        GcAdpcmFormat::encode_from_pcm16(&Pcm16Format::new(32000, pcm).unwrap()).unwrap()
    }

    fn field(bytes: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn interleaved(samples: usize) -> Configuration {
        Configuration::builder().samples_per_interleave(samples).build().unwrap()
    }

    #[test]
    fn test_header_fields() {
        let audio = stream(2, 1000).with_loop(true, 100, 900).unwrap();
        let bytes = write(&audio, &Configuration::default()).unwrap();

        assert_eq!(&bytes[..4], b"IDSP");
        assert_eq!(field(&bytes, 0x08), 2);
        assert_eq!(field(&bytes, 0x0C), 32000);
        assert_eq!(field(&bytes, 0x10), 1000);
        assert_eq!(field(&bytes, 0x14), 100);
        assert_eq!(field(&bytes, 0x18), 900);
        assert_eq!(field(&bytes, 0x1C), 0);
        assert_eq!(field(&bytes, 0x20), 0x40);
        assert_eq!(field(&bytes, 0x24), 0x60);
        assert_eq!(field(&bytes, 0x28), 0x100);

        let audio_data_size = sample_count_to_frame_bytes(1000);
        assert_eq!(field(&bytes, 0x2C) as usize, audio_data_size);
        assert_eq!(bytes.len(), 0x100 + 2 * audio_data_size);

        // Channel record addresses are nibble positions of the loop.
        let record = 0x40;
        assert_eq!(field(&bytes, record + 0x04) as usize, sample_count_to_nibble_count(1000));
        assert_eq!(field(&bytes, record + 0x10) as usize, sample_to_nibble(100));
        assert_eq!(field(&bytes, record + 0x14) as usize, sample_to_nibble(900));
        assert_eq!(field(&bytes, record + 0x18), 2);
    }

    #[test]
    fn test_end_address_without_loop() {
        let bytes = write(&stream(1, 1000), &Configuration::default()).unwrap();
        assert_eq!(field(&bytes, 0x40 + 0x10), 2);
        assert_eq!(field(&bytes, 0x40 + 0x14) as usize, sample_to_nibble(999));
    }

    #[test]
    fn test_file_read() {
        let audio = stream(2, 5000).with_loop(true, 1200, 4800).unwrap();
        let parsed = parse_container(write(&audio, &Configuration::default()).unwrap()).unwrap();

        assert_eq!(parsed.kind, ContainerKind::Idsp);
        assert_eq!(parsed.audio.info(), audio.info());
        assert_eq!(parsed.audio.channels(), audio.channels());
        assert_eq!(
            parsed.audio.channels()[0].loop_context(1200),
            audio.channels()[0].loop_context(1200)
        );
        assert_eq!(parsed.configuration.samples_per_interleave(), 5012);
    }

    #[test]
    fn test_interleaved_round_trip() {
        let cases = [(2, 5000, 14 * 16), (3, 14 * 32 * 4, 14 * 32), (1, 100, 14)];
        for (channels, count, samples_per_interleave) in cases {
            let audio = stream(channels, count);
            let config = interleaved(samples_per_interleave);

            let bytes = write(&audio, &config).unwrap();
            assert_eq!(field(&bytes, 0x1C) as usize, samples_per_interleave / 14 * 8);
            assert_eq!(field(&bytes, 0x2C) as usize % (samples_per_interleave / 14 * 8), 0);

            let parsed = parse_container(bytes.clone()).unwrap();
            assert_eq!(parsed.audio.channels(), audio.channels());
            assert_eq!(parsed.configuration.samples_per_interleave(), samples_per_interleave);
            assert_eq!(write(&parsed.audio, &parsed.configuration).unwrap(), bytes);
        }
    }

    #[test]
    fn test_write_read_write_is_identical() {
        let audio = stream(2, 3333).with_loop(true, 33, 3000).unwrap();
        let first = write(&audio, &Configuration::default()).unwrap();
        let parsed = parse_container(first.clone()).unwrap();
        assert_eq!(write(&parsed.audio, &parsed.configuration).unwrap(), first);
    }

    #[test]
    fn test_empty_stream() {
        let channel = GcAdpcmChannel::new(Bytes::new(), [0; 16], 0).unwrap();
        let audio = GcAdpcmFormat::builder(22050, vec![channel]).build().unwrap();

        let bytes = write(&audio, &Configuration::default()).unwrap();
        assert_eq!(bytes.len(), 0xA0);

        let parsed = parse_container(bytes).unwrap();
        assert_eq!(parsed.audio.info().sample_count, 0);
        assert_eq!(parsed.configuration.samples_per_interleave(), 14);
    }

    #[test]
    fn test_rejects_file_length_mismatch() {
        let mut bytes = write(&stream(1, 1000), &Configuration::default()).unwrap().to_vec();
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(
            parse::<IdspFrame>(bytes.into()),
            Err(Error::MalformedHeader(HeaderError::FileLengthMismatch { .. }))
        ));
    }

    #[test]
    fn test_rejects_small_channel_records() {
        let mut bytes = write(&stream(1, 1000), &Configuration::default()).unwrap().to_vec();
        bytes[0x24..0x28].copy_from_slice(&0x40u32.to_be_bytes());
        assert_eq!(
            parse_container(bytes).unwrap_err(),
            Error::invalid_field("channel info size", 0x40)
        );
    }

    #[test]
    fn test_rejects_channel_sample_count_mismatch() {
        let mut bytes = write(&stream(2, 1000), &Configuration::default()).unwrap().to_vec();
        bytes[0xA0..0xA4].copy_from_slice(&999u32.to_be_bytes());
        assert_eq!(
            parse_container(bytes).unwrap_err(),
            Error::invalid_field("channel sample count", 999)
        );
    }

    #[test]
    fn test_rejects_unaligned_interleave() {
        let mut bytes = write(&stream(2, 1000), &interleaved(14 * 4)).unwrap().to_vec();
        bytes[0x1C..0x20].copy_from_slice(&12u32.to_be_bytes());
        assert!(parse_container(bytes).is_err());
    }

    #[test]
    fn test_rejects_loop_address_mismatch() {
        let audio = stream(1, 1000).with_loop(true, 100, 900).unwrap();
        let mut bytes = write(&audio, &Configuration::default()).unwrap().to_vec();
        let address = sample_to_nibble(114) as u32;
        bytes[0x50..0x54].copy_from_slice(&address.to_be_bytes());
        assert_eq!(
            parse_container(bytes).unwrap_err(),
            Error::invalid_field("loop start address", address as i64)
        );
    }

    #[test]
    fn test_rejects_predictor_without_coefficients() {
        let mut bytes = write(&stream(1, 1000), &Configuration::default()).unwrap().to_vec();
        bytes[0xA0] = 0xF3;
        assert_eq!(parse_container(bytes).unwrap_err(), Error::invalid_field("predictor", 15));
    }
}

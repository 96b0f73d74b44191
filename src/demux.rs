//! Container adapter boundary for the video path.
//!
//! The playback engine only ever sees [`ContainerAdapter`]: open a file,
//! pull demultiplexed packets, close. The production adapter walks RIFF/AVI
//! containers carrying Motion-JPEG video (and optional PCM audio), the
//! format this class of appliance records and plays.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Error;

/// Stream-level facts reported by the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// `None` when the container does not report a usable duration.
    pub duration: Option<Duration>,
    /// Audio stream format, when one is present.
    pub audio: Option<AudioParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// One demultiplexed payload.
#[derive(Debug)]
pub enum Packet {
    /// A complete compressed video frame (JPEG bytes).
    Video(Vec<u8>),
    /// Raw audio samples in the format reported at open.
    Audio(Vec<u8>),
}

/// Audio output device boundary. Absent at engine init means audio
/// extraction is skipped entirely.
pub trait AudioSink: Send + Sync {
    fn configure(&self, sample_rate: u32, channels: u16, bits_per_sample: u16);
    fn push(&self, samples: &[u8]);
    fn set_volume(&self, volume: i32);
}

/// Demultiplexes one container file into a packet sequence.
pub trait ContainerAdapter: Send {
    fn open(&mut self, path: &Path, extract_audio: bool) -> Result<StreamInfo, Error>;
    /// Next packet in stream order; `None` at end of stream.
    fn next_packet(&mut self) -> Result<Option<Packet>, Error>;
    fn close(&mut self);
}

/// Builds fresh adapters; used at engine init and again when a stuck
/// extraction context forces the engine to abandon the old adapter.
pub type AdapterFactory = Box<dyn Fn() -> Box<dyn ContainerAdapter> + Send + Sync>;

const FOURCC_RIFF: [u8; 4] = *b"RIFF";
const FOURCC_AVI: [u8; 4] = *b"AVI ";
const FOURCC_LIST: [u8; 4] = *b"LIST";

struct OpenStream {
    reader: BufReader<File>,
    movi_end: u64,
    info: StreamInfo,
    extract_audio: bool,
}

/// RIFF/AVI Motion-JPEG demuxer.
#[derive(Default)]
pub struct AviMotionJpeg {
    stream: Option<OpenStream>,
}

impl AviMotionJpeg {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerAdapter for AviMotionJpeg {
    fn open(&mut self, path: &Path, extract_audio: bool) -> Result<StreamInfo, Error> {
        self.close();

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut fourcc = [0u8; 4];
        read_exact(&mut reader, &mut fourcc)?;
        let riff_size = read_u32(&mut reader)?;
        let mut form = [0u8; 4];
        read_exact(&mut reader, &mut form)?;
        if fourcc != FOURCC_RIFF || form != FOURCC_AVI {
            return Err(Error::UnsupportedFormat(format!(
                "{} is not a RIFF/AVI container",
                path.display()
            )));
        }
        let riff_end = 8 + u64::from(riff_size);

        let mut header: Option<AviHeader> = None;
        let mut movi: Option<(u64, u64)> = None;

        // Top-level chunk walk: hdrl gives us stream facts, movi gives us data.
        let mut pos = reader.stream_position()?;
        while pos < riff_end {
            let (id, size) = match read_chunk_header(&mut reader) {
                Ok(h) => h,
                Err(_) => break,
            };
            let body = pos + 8;
            if id == FOURCC_LIST {
                let mut list_type = [0u8; 4];
                read_exact(&mut reader, &mut list_type)?;
                match &list_type {
                    b"hdrl" => {
                        let len = u64::from(size).saturating_sub(4);
                        header = Some(parse_hdrl(&mut reader, body + 4, len)?);
                    }
                    b"movi" => {
                        movi = Some((body + 4, body + u64::from(size)));
                        break;
                    }
                    _ => {}
                }
            }
            pos = body + u64::from(size) + u64::from(size % 2);
            reader.seek(SeekFrom::Start(pos))?;
        }

        let header = header.ok_or_else(|| {
            Error::UnsupportedFormat(format!("{}: missing avi header list", path.display()))
        })?;
        let (movi_start, movi_end) = movi.ok_or_else(|| {
            Error::UnsupportedFormat(format!("{}: missing movi data list", path.display()))
        })?;
        if !header.video_is_mjpeg {
            return Err(Error::UnsupportedFormat(format!(
                "{}: video stream is not motion-jpeg",
                path.display()
            )));
        }

        let fps = if header.micro_sec_per_frame > 0 {
            (1_000_000 / header.micro_sec_per_frame).max(1)
        } else {
            0
        };
        let duration = (header.micro_sec_per_frame > 0 && header.total_frames > 0).then(|| {
            Duration::from_micros(u64::from(header.micro_sec_per_frame) * u64::from(header.total_frames))
        });

        let info = StreamInfo {
            width: header.width,
            height: header.height,
            fps,
            duration,
            audio: header.audio,
        };

        debug!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            duration_ms = info.duration.map(|d| d.as_millis() as u64),
            has_audio = info.audio.is_some(),
            "avi container opened"
        );

        reader.seek(SeekFrom::Start(movi_start))?;
        self.stream = Some(OpenStream {
            reader,
            movi_end,
            info,
            extract_audio: extract_audio && header.audio.is_some(),
        });
        Ok(info)
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, Error> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::InvalidState("adapter has no open container"))?;

        loop {
            let pos = stream.reader.stream_position()?;
            if pos + 8 > stream.movi_end {
                return Ok(None);
            }
            let (id, size) = read_chunk_header(&mut stream.reader)?;
            // Nested `rec ` lists group interleaved chunks; descend into them.
            if id == FOURCC_LIST {
                let mut list_type = [0u8; 4];
                read_exact(&mut stream.reader, &mut list_type)?;
                continue;
            }
            let padded = u64::from(size) + u64::from(size % 2);
            match &id[2..4] {
                b"dc" | b"db" => {
                    let mut payload = vec![0u8; size as usize];
                    read_exact(&mut stream.reader, &mut payload)?;
                    if size % 2 == 1 {
                        stream.reader.seek(SeekFrom::Current(1))?;
                    }
                    return Ok(Some(Packet::Video(payload)));
                }
                b"wb" if stream.extract_audio => {
                    let mut payload = vec![0u8; size as usize];
                    read_exact(&mut stream.reader, &mut payload)?;
                    if size % 2 == 1 {
                        stream.reader.seek(SeekFrom::Current(1))?;
                    }
                    return Ok(Some(Packet::Audio(payload)));
                }
                _ => {
                    stream.reader.seek(SeekFrom::Current(padded as i64))?;
                }
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

struct AviHeader {
    micro_sec_per_frame: u32,
    total_frames: u32,
    width: u32,
    height: u32,
    video_is_mjpeg: bool,
    audio: Option<AudioParams>,
}

fn parse_hdrl<R: Read + Seek>(reader: &mut R, start: u64, len: u64) -> Result<AviHeader, Error> {
    let mut header = AviHeader {
        micro_sec_per_frame: 0,
        total_frames: 0,
        width: 0,
        height: 0,
        video_is_mjpeg: false,
        audio: None,
    };

    let end = start + len;
    let mut pos = start;
    while pos + 8 <= end {
        reader.seek(SeekFrom::Start(pos))?;
        let (id, size) = read_chunk_header(reader)?;
        let body = pos + 8;
        match &id {
            b"avih" => {
                header.micro_sec_per_frame = read_u32(reader)?;
                reader.seek(SeekFrom::Current(12))?; // max bytes/sec, padding, flags
                header.total_frames = read_u32(reader)?;
                reader.seek(SeekFrom::Current(12))?; // initial frames, streams, buffer size
                header.width = read_u32(reader)?;
                header.height = read_u32(reader)?;
            }
            &FOURCC_LIST => {
                let mut list_type = [0u8; 4];
                read_exact(reader, &mut list_type)?;
                if &list_type == b"strl" {
                    let len = u64::from(size).saturating_sub(4);
                    parse_strl(reader, body + 4, len, &mut header)?;
                }
            }
            _ => {}
        }
        pos = body + u64::from(size) + u64::from(size % 2);
    }

    Ok(header)
}

fn parse_strl<R: Read + Seek>(
    reader: &mut R,
    start: u64,
    len: u64,
    header: &mut AviHeader,
) -> Result<(), Error> {
    let end = start + len;
    let mut pos = start;
    let mut stream_type = [0u8; 4];
    let mut handler = [0u8; 4];
    while pos + 8 <= end {
        reader.seek(SeekFrom::Start(pos))?;
        let (id, size) = read_chunk_header(reader)?;
        let body = pos + 8;
        match &id {
            b"strh" => {
                read_exact(reader, &mut stream_type)?;
                read_exact(reader, &mut handler)?;
                if &stream_type == b"vids" && &handler == b"MJPG" {
                    header.video_is_mjpeg = true;
                }
            }
            b"strf" => match &stream_type {
                b"vids" => {
                    // BITMAPINFOHEADER: compression fourcc lives at offset 16.
                    reader.seek(SeekFrom::Current(16))?;
                    let mut compression = [0u8; 4];
                    read_exact(reader, &mut compression)?;
                    if &compression == b"MJPG" {
                        header.video_is_mjpeg = true;
                    }
                }
                b"auds" => {
                    let format_tag = read_u16(reader)?;
                    let channels = read_u16(reader)?;
                    let sample_rate = read_u32(reader)?;
                    reader.seek(SeekFrom::Current(6))?; // avg bytes/sec, block align
                    let bits_per_sample = read_u16(reader)?;
                    if format_tag == 1 {
                        header.audio = Some(AudioParams {
                            sample_rate,
                            channels,
                            bits_per_sample,
                        });
                    } else {
                        warn!(format_tag, "non-pcm audio stream ignored");
                    }
                }
                _ => {}
            },
            _ => {}
        }
        pos = body + u64::from(size) + u64::from(size % 2);
    }
    Ok(())
}

fn read_chunk_header<R: Read>(reader: &mut R) -> Result<([u8; 4], u32), Error> {
    let mut id = [0u8; 4];
    read_exact(reader, &mut id)?;
    let size = read_u32(reader)?;
    Ok((id, size))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    reader.read_exact(buf).map_err(Error::Io)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16, Error> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Builds a minimal MJPEG AVI in memory. Shared with integration tests.
pub fn build_mjpeg_avi(
    frames: &[Vec<u8>],
    width: u32,
    height: u32,
    fps: u32,
    audio_chunks: &[Vec<u8>],
) -> Vec<u8> {
    fn chunk(out: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
    }

    fn list(out: &mut Vec<u8>, list_type: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(list_type);
        out.extend_from_slice(body);
    }

    let micro_sec_per_frame: u32 = if fps > 0 { 1_000_000 / fps } else { 0 };

    let mut avih = Vec::new();
    avih.extend_from_slice(&micro_sec_per_frame.to_le_bytes());
    avih.extend_from_slice(&[0u8; 12]);
    avih.extend_from_slice(&(frames.len() as u32).to_le_bytes());
    avih.extend_from_slice(&[0u8; 12]);
    avih.extend_from_slice(&width.to_le_bytes());
    avih.extend_from_slice(&height.to_le_bytes());
    avih.extend_from_slice(&[0u8; 16]);

    let mut strh = Vec::new();
    strh.extend_from_slice(b"vids");
    strh.extend_from_slice(b"MJPG");
    strh.extend_from_slice(&[0u8; 48]);

    let mut strf = Vec::new();
    strf.extend_from_slice(&40u32.to_le_bytes());
    strf.extend_from_slice(&(width as i32).to_le_bytes());
    strf.extend_from_slice(&(height as i32).to_le_bytes());
    strf.extend_from_slice(&1u16.to_le_bytes());
    strf.extend_from_slice(&24u16.to_le_bytes());
    strf.extend_from_slice(b"MJPG");
    strf.extend_from_slice(&[0u8; 20]);

    let mut strl_video = Vec::new();
    chunk(&mut strl_video, b"strh", &strh);
    chunk(&mut strl_video, b"strf", &strf);

    let mut hdrl = Vec::new();
    chunk(&mut hdrl, b"avih", &avih);
    list(&mut hdrl, b"strl", &strl_video);

    if !audio_chunks.is_empty() {
        let mut strh_a = Vec::new();
        strh_a.extend_from_slice(b"auds");
        strh_a.extend_from_slice(&[0u8; 52]);
        let mut strf_a = Vec::new();
        strf_a.extend_from_slice(&1u16.to_le_bytes()); // PCM
        strf_a.extend_from_slice(&2u16.to_le_bytes());
        strf_a.extend_from_slice(&44_100u32.to_le_bytes());
        strf_a.extend_from_slice(&[0u8; 6]);
        strf_a.extend_from_slice(&16u16.to_le_bytes());
        let mut strl_audio = Vec::new();
        chunk(&mut strl_audio, b"strh", &strh_a);
        chunk(&mut strl_audio, b"strf", &strf_a);
        list(&mut hdrl, b"strl", &strl_audio);
    }

    let mut movi = Vec::new();
    let count = frames.len().max(audio_chunks.len());
    for i in 0..count {
        if let Some(frame) = frames.get(i) {
            chunk(&mut movi, b"00dc", frame);
        }
        if let Some(audio) = audio_chunks.get(i) {
            chunk(&mut movi, b"01wb", audio);
        }
    }

    let mut riff_body = Vec::new();
    list(&mut riff_body, b"hdrl", &hdrl);
    list(&mut riff_body, b"movi", &movi);

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((riff_body.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(b"AVI ");
    out.extend_from_slice(&riff_body);
    out
}

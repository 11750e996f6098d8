//! Streaming decoder for the lzip container.
//!
//! An lzip file is one or more members laid end to end. Each member is a
//! 6-byte header, a raw LZMA stream terminated by an end marker, and a
//! 20-byte footer. liblzma has no lzip support, so the framing is parsed here
//! and every member gets a fresh `.lzma` decoder, primed with a synthesized
//! `.lzma` header that carries the member's dictionary size.
use std::io::{self, BufRead, Read};
use xz2::stream::{Action, Status, Stream};

const MAGIC: &[u8; 4] = b"LZIP";
const VERSION: u8 = 1;
const HEADER_SIZE: usize = 6;
const FOOTER_SIZE: usize = 20;
const MIN_DICTIONARY_BITS: u8 = 12;
const MAX_DICTIONARY_BITS: u8 = 29;
const MIN_DICTIONARY_SIZE: u32 = 1 << MIN_DICTIONARY_BITS;

/// The LZMA properties byte every lzip member uses (lc=3, lp=0, pb=2).
const LZMA_PROPERTIES: u8 = 0x5d;
/// Length of a `.lzma` header: properties, dictionary size, uncompressed size.
const LZMA_HEADER_SIZE: usize = 13;

/// Decodes the coded dictionary size byte of a member header.
///
/// The low 5 bits are a base-2 exponent; the high 3 bits are the number of
/// sixteenths of that power to subtract.
pub(crate) fn decode_dictionary_size(coded: u8) -> Option<u32> {
    let bits = coded & 0x1f;
    if !(MIN_DICTIONARY_BITS..=MAX_DICTIONARY_BITS).contains(&bits) {
        return None;
    }
    let mut size = 1u32 << bits;
    if size > MIN_DICTIONARY_SIZE {
        size -= (size / 16) * u32::from(coded >> 5);
    }
    Some(size)
}

/// Builds the `.lzma` header for a member: the properties byte, the
/// dictionary size and an unknown uncompressed size, which tells the decoder
/// to expect an end marker.
fn lzma_header(dictionary_size: u32) -> [u8; LZMA_HEADER_SIZE] {
    let mut header = [0xffu8; LZMA_HEADER_SIZE];
    header[0] = LZMA_PROPERTIES;
    header[1..5].copy_from_slice(&dictionary_size.to_le_bytes());
    header
}

/// Sets up a `.lzma` decoder and feeds it the synthesized header, so that
/// its counters afterwards run `LZMA_HEADER_SIZE` bytes ahead of the member.
fn member_stream(dictionary_size: u32) -> io::Result<Stream> {
    let mut stream = Stream::new_lzma_decoder(u64::MAX).map_err(invalid_data)?;
    let header = lzma_header(dictionary_size);
    let mut scratch = [0u8; 64];
    while (stream.total_in() as usize) < LZMA_HEADER_SIZE {
        let before = stream.total_in();
        stream
            .process(&header[before as usize..], &mut scratch, Action::Run)
            .map_err(invalid_data)?;
        if stream.total_in() == before {
            return Err(invalid_data("lzma decoder rejected member header"));
        }
    }
    Ok(stream)
}

fn invalid_data(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

fn truncated(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("lzip {what} truncated"))
}

/// Decoding state of the member currently being read.
struct Member {
    stream: Stream,
    crc: flate2::Crc,
    index: u64,
}

/// Reads the decompressed contents of all members of an lzip stream.
pub(crate) struct LzipDecoder<R> {
    inner: R,
    member: Option<Member>,
    started: bool,
    members_done: u64,
}

impl<R: BufRead> LzipDecoder<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            member: None,
            started: false,
            members_done: 0,
        }
    }

    /// Reads up to `buf.len()` bytes, stopping early only at end of input.
    fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Parses a member header and sets up its decoder.
    ///
    /// A missing or malformed header ends the stream when at least one member
    /// has been decoded, and is an error for the first member.
    fn start_member(&mut self) -> io::Result<Option<Member>> {
        let first = self.members_done == 0;
        let mut header = [0u8; HEADER_SIZE];
        let n = self.read_up_to(&mut header)?;

        let dictionary_size = if n == HEADER_SIZE && &header[..4] == MAGIC && header[4] == VERSION
        {
            decode_dictionary_size(header[5])
        } else {
            None
        };

        let Some(dictionary_size) = dictionary_size else {
            if first {
                return Err(invalid_data("not an lzip stream (bad member header)"));
            }
            tracing::debug!(members = self.members_done, "lzip: no further member");
            return Ok(None);
        };

        let stream = member_stream(dictionary_size)?;

        tracing::debug!(
            member = self.members_done,
            dictionary_size,
            "lzip: starting member"
        );

        Ok(Some(Member {
            stream,
            crc: flate2::Crc::new(),
            index: self.members_done,
        }))
    }

    /// Checks the footer of the member that just reached its end marker.
    fn finish_member(&mut self, member: Member) -> io::Result<()> {
        let mut footer = [0u8; FOOTER_SIZE];
        if self.read_up_to(&mut footer)? != FOOTER_SIZE {
            return Err(truncated("member footer"));
        }

        let crc = u32::from_le_bytes(footer[0..4].try_into().map_err(invalid_data)?);
        let data_size = u64::from_le_bytes(footer[4..12].try_into().map_err(invalid_data)?);
        let member_size = u64::from_le_bytes(footer[12..20].try_into().map_err(invalid_data)?);

        if crc != member.crc.sum() {
            return Err(invalid_data(format!(
                "lzip member {} CRC mismatch",
                member.index
            )));
        }
        if data_size != member.stream.total_out() {
            return Err(invalid_data(format!(
                "lzip member {} size mismatch: footer says {data_size}, decoded {}",
                member.index,
                member.stream.total_out()
            )));
        }
        let payload_size = member.stream.total_in() - LZMA_HEADER_SIZE as u64;
        let expected_member_size = (HEADER_SIZE + FOOTER_SIZE) as u64 + payload_size;
        if member_size != expected_member_size {
            return Err(invalid_data(format!(
                "lzip member {} length mismatch",
                member.index
            )));
        }

        self.members_done += 1;
        Ok(())
    }
}

impl<R: BufRead> Read for LzipDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.started {
            self.started = true;
            self.member = self.start_member()?;
        }

        loop {
            let Some(member) = self.member.as_mut() else {
                return Ok(0);
            };

            let (consumed, produced, status, eof) = {
                let input = self.inner.fill_buf()?;
                let eof = input.is_empty();
                let action = if eof { Action::Finish } else { Action::Run };
                let before_in = member.stream.total_in();
                let before_out = member.stream.total_out();
                let status = member
                    .stream
                    .process(input, buf, action)
                    .map_err(invalid_data)?;
                (
                    (member.stream.total_in() - before_in) as usize,
                    (member.stream.total_out() - before_out) as usize,
                    status,
                    eof,
                )
            };
            self.inner.consume(consumed);
            member.crc.update(&buf[..produced]);

            if status == Status::StreamEnd {
                if let Some(done) = self.member.take() {
                    self.finish_member(done)?;
                }
                self.member = self.start_member()?;
                if produced > 0 {
                    return Ok(produced);
                }
                continue;
            }

            if produced > 0 {
                return Ok(produced);
            }
            if eof && consumed == 0 {
                return Err(truncated("member data"));
            }
        }
    }
}

//! Receive thread.
//!
//! Reads the socket into a fixed local buffer, splits the byte stream back
//! into frames using each value's self-describing length, and hands every
//! frame to the correlation step of the client's delivery mode.
use std::{
    io::{self, Read},
    net::TcpStream,
    sync::Arc,
};

use log::{debug, trace};

use crate::{
    error::{ErrorKind, Result},
    wire::Message,
};

use super::{Mode, Shared, ring::Correlation};

/// Size of the buffer each socket read lands in.
pub(crate) const READ_BUF_SIZE: usize = 4096;

/// Output of [`FrameAssembler::feed`].
#[derive(Debug)]
pub(crate) enum Assembled {
    Frame(Message),
    /// No memory for a frame of `size` bytes; its bytes are being skipped.
    Dropped { size: usize },
}

#[derive(Debug)]
struct Partial {
    buf: Vec<u8>,
    size: usize,
}

/// Reassembles frames from arbitrarily split reads.
#[derive(Debug, Default)]
pub(crate) struct FrameAssembler {
    /// Leading bytes of a frame whose length is not known yet.
    header: Vec<u8>,
    frame: Option<Partial>,
    /// Bytes still to skip from an abandoned frame.
    discard: usize,
}

impl FrameAssembler {
    /// Consumes `data`, calling `sink` for every frame completed or dropped.
    ///
    /// # Errors
    ///
    /// [`OpoError::Parse`](crate::OpoError::Parse) when a frame header is
    /// corrupt. The stream cannot be resynchronized after that.
    pub fn feed(&mut self, mut data: &[u8], mut sink: impl FnMut(Assembled)) -> Result<()> {
        while !data.is_empty() {
            if self.discard > 0 {
                let n = self.discard.min(data.len());
                self.discard -= n;
                data = &data[n..];
                continue;
            }

            if let Some(partial) = self.frame.as_mut() {
                let n = (partial.size - partial.buf.len()).min(data.len());
                partial.buf.extend_from_slice(&data[..n]);
                data = &data[n..];
                self.complete(&mut sink);
                continue;
            }

            let size = if self.header.is_empty() {
                match Message::frame_size(data)? {
                    Some(size) => size,
                    None => {
                        self.header.extend_from_slice(data);
                        return Ok(());
                    }
                }
            } else {
                self.header.push(data[0]);
                data = &data[1..];
                match Message::frame_size(&self.header)? {
                    Some(size) => size,
                    None => continue,
                }
            };
            self.start(size, &mut sink);
        }
        Ok(())
    }

    fn start(&mut self, size: usize, sink: &mut impl FnMut(Assembled)) {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            self.discard = size - self.header.len();
            self.header.clear();
            sink(Assembled::Dropped { size });
            return;
        }
        buf.append(&mut self.header);
        trace!("frame of {size} bytes started");
        self.frame = Some(Partial { buf, size });
        self.complete(sink);
    }

    fn complete(&mut self, sink: &mut impl FnMut(Assembled)) {
        if self
            .frame
            .as_ref()
            .is_some_and(|partial| partial.buf.len() == partial.size)
        {
            if let Some(done) = self.frame.take() {
                sink(Assembled::Frame(Message::from_built(done.buf)));
            }
        }
    }

    /// Whether a frame has been started but not finished.
    pub fn in_progress(&self) -> bool {
        !self.header.is_empty() || self.frame.is_some() || self.discard > 0
    }
}

/// Body of the receive thread. Returns once the client closes or the
/// connection fails.
pub(crate) fn run(shared: Arc<Shared>, mut stream: TcpStream) {
    let mut buf = [0u8; READ_BUF_SIZE];
    let mut assembler = FrameAssembler::default();

    while shared.is_active() {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                if !shared.is_active() {
                    break;
                }
                if assembler.in_progress() || shared.outstanding() > 0 {
                    shared.report(
                        false,
                        Some(ErrorKind::Read),
                        "closed with outstanding responses",
                    );
                } else {
                    shared.report(false, None, "connection closed");
                }
                break;
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if shared.is_active() {
                    shared.report(false, Some(ErrorKind::Read), &format!("read failed: {e}"));
                }
                break;
            }
        };

        let fed = assembler.feed(&buf[..n], |event| match event {
            Assembled::Frame(msg) => deliver(&shared, msg),
            Assembled::Dropped { size } => shared.report(
                true,
                Some(ErrorKind::Memory),
                &format!("no memory for a {size} byte response, skipping it"),
            ),
        });
        if let Err(e) = fed {
            shared.report(false, Some(e.kind()), &e.to_string());
            break;
        }
    }

    debug!("receive thread exiting");
}

fn deliver(shared: &Shared, msg: Message) {
    let id = msg.id();
    trace!("response {id} of {} bytes", msg.len());

    match &shared.mode {
        Mode::Correlated(ring) => match ring.correlate(msg) {
            Correlation::Resolved { lost } => {
                if lost > 0 {
                    debug!("response {id} resolved {lost} skipped queries as lost");
                }
            }
            Correlation::NotFound => shared.report(
                true,
                Some(ErrorKind::NotFound),
                &format!("no pending query for response {id}"),
            ),
            Correlation::TooMany => shared.report(
                true,
                Some(ErrorKind::TooMany),
                &format!("more than one response for query {id}"),
            ),
        },
        Mode::Streaming { queue, .. } => {
            queue.push(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Builder, sample::build_sample};

    fn frames() -> Vec<Message> {
        let mut b = Builder::new();
        build_sample(&mut b);
        let mut sample = b.take().unwrap();
        sample.set_id(1);

        b.push_null(None).unwrap();
        let mut null = b.take().unwrap();
        null.set_id(2);

        b.push_string(None, &"x".repeat(5000)).unwrap();
        let mut long = b.take().unwrap();
        long.set_id(3);

        vec![sample, null, long]
    }

    fn stream_of(frames: &[Message]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect()
    }

    fn assemble(stream: &[u8], chunk: usize) -> (Vec<Message>, FrameAssembler) {
        let mut assembler = FrameAssembler::default();
        let mut out = Vec::new();
        for piece in stream.chunks(chunk) {
            assembler
                .feed(piece, |event| match event {
                    Assembled::Frame(msg) => out.push(msg),
                    Assembled::Dropped { size } => panic!("dropped {size}"),
                })
                .unwrap();
        }
        (out, assembler)
    }

    #[test]
    fn many_frames_in_one_read() {
        let frames = frames();
        let (out, assembler) = assemble(&stream_of(&frames), usize::MAX);
        assert_eq!(out, frames);
        assert!(!assembler.in_progress());
    }

    #[test]
    fn frames_split_across_reads() {
        let frames = frames();
        let stream = stream_of(&frames);
        for chunk in [1, 2, 7, 13, READ_BUF_SIZE] {
            let (out, assembler) = assemble(&stream, chunk);
            assert_eq!(out, frames, "chunk size {chunk}");
            assert!(!assembler.in_progress());
        }
    }

    #[test]
    fn partial_frame_is_in_progress() {
        let frames = frames();
        let stream = stream_of(&frames[..1]);
        let (out, assembler) = assemble(&stream[..stream.len() - 1], 64);
        assert!(out.is_empty());
        assert!(assembler.in_progress());

        let (_, assembler) = assemble(&stream[..4], 64);
        assert!(assembler.in_progress());
    }

    #[test]
    #[should_panic(expected = "unknown tag 0x01")]
    fn corrupt_header_fails() {
        let mut assembler = FrameAssembler::default();
        assembler
            .feed(&[0, 0, 0, 0, 0, 0, 0, 1, 0x01], |_| {})
            .unwrap();
    }
}

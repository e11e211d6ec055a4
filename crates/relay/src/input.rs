//! Inbound byte stream read off the async runtime.

use std::{
    io::{self, Read},
    thread,
};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::debug;

const CHUNK_SIZE: usize = 8 * 1024;
const CHUNK_QUEUE_CAPACITY: usize = 16;

pub type DetachedReader = StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>;

/// Reads `reader` on its own OS thread and exposes it as an async buffered
/// reader.
///
/// A blocking read cannot be cancelled, so the thread is never joined: a
/// session that stops while a read is pending leaves it behind instead of
/// holding up runtime shutdown. The thread ends at end of input, on a read
/// error, or once the returned reader is dropped and the next chunk arrives.
pub fn detached_reader<R>(reader: R) -> io::Result<DetachedReader>
where
    R: Read + Send + 'static,
{
    let (chunks, receiver) = mpsc::channel(CHUNK_QUEUE_CAPACITY);

    thread::Builder::new()
        .name("bridge-input".to_string())
        .spawn(move || pump(reader, chunks))?;

    Ok(StreamReader::new(ReceiverStream::new(receiver)))
}

fn pump<R: Read>(mut reader: R, chunks: mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let chunk = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();

        if chunks.blocking_send(chunk).is_err() || failed {
            break;
        }
    }

    debug!("Input reader finished");
}

use std::{
    any::Any,
    io::{self, ErrorKind, Read, Write},
    panic::{self, AssertUnwindSafe},
};

use log::{debug, warn};

use super::{Event, Framer, Handler, Peer};

/// Why a connection stopped before reaching end of stream.
#[derive(Debug)]
enum Ended {
    Io(io::Error),
    Handler(String),
    Panic(String),
}

/// Serves one connection: `Open`, one `Receive` per framed message, then
/// `Close`, whatever way the stream ends.
///
/// A non-empty `Receive` response is written and flushed before the next
/// message is handled, and the stream is only read again once every message of
/// the previous read has been answered. `Open` and `Close` responses are
/// ignored. A handler that panics while the connection is open still gets
/// `Close`.
pub fn handle_connection<S, H>(mut stream: S, peer: &Peer, mut framer: Framer, handler: &mut H)
where
    S: Read + Write,
    H: Handler + ?Sized,
{
    debug!("{peer} connected");

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        notify(handler, Event::Open, peer)?;
        receive_loop(&mut stream, peer, &mut framer, handler)
    }))
    .unwrap_or_else(|payload| Err(Ended::Panic(panic_message(payload))));

    match result {
        Ok(()) => debug!("{peer} closed the connection"),
        Err(Ended::Io(e)) => debug!("{peer} connection error: {e}"),
        Err(Ended::Handler(e)) => warn!("handler failed for {peer}: {e}"),
        Err(Ended::Panic(e)) => warn!("handler panicked for {peer}: {e}"),
    }

    if let Err(Ended::Handler(e)) = notify(handler, Event::Close, peer) {
        warn!("close handler failed for {peer}: {e}");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |msg| msg.to_string()),
    }
}

fn receive_loop<S, H>(
    stream: &mut S,
    peer: &Peer,
    framer: &mut Framer,
    handler: &mut H,
) -> Result<(), Ended>
where
    S: Read + Write,
    H: Handler + ?Sized,
{
    let mut buf = vec![0; framer.max_len()];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Ended::Io(e)),
        };

        for msg in framer.feed(&buf[..n]) {
            respond(handler, &msg, peer, stream)?;
        }
    }
}

fn notify<H>(handler: &mut H, event: Event<'_>, peer: &Peer) -> Result<(), Ended>
where
    H: Handler + ?Sized,
{
    handler
        .handle(event, peer)
        .map(drop)
        .map_err(|e| Ended::Handler(e.to_string()))
}

fn respond<S, H>(handler: &mut H, msg: &[u8], peer: &Peer, stream: &mut S) -> Result<(), Ended>
where
    S: Write,
    H: Handler + ?Sized,
{
    let response = handler
        .handle(Event::Receive(msg), peer)
        .map_err(|e| Ended::Handler(e.to_string()))?;

    match response {
        Some(bytes) if !bytes.is_empty() => {
            stream.write_all(&bytes).map_err(Ended::Io)?;
            stream.flush().map_err(Ended::Io)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use crate::protocol::HandlerResult;

    use super::*;

    /// In-memory stream replaying scripted reads and recording writes.
    #[derive(Default)]
    struct Script {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        fail_writes: bool,
    }

    impl Script {
        fn reads(reads: &[&[u8]]) -> Self {
            Self {
                reads: reads.iter().map(|r| Ok(r.to_vec())).collect(),
                ..Default::default()
            }
        }

        fn then_fail(mut self) -> Self {
            self.reads
                .push_back(Err(io::Error::new(ErrorKind::ConnectionReset, "reset")));
            self
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut data)) => {
                    if data.len() > buf.len() {
                        let rest = data.split_off(buf.len());
                        self.reads.push_front(Ok(rest));
                    }
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "closed"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Records every event and answers `Receive(m)` with `<m>`.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        fail_on: Option<&'static [u8]>,
        panic_on: Option<&'static [u8]>,
    }

    impl Handler for Recorder {
        fn handle(&mut self, event: Event<'_>, _peer: &Peer) -> HandlerResult {
            match event {
                Event::Receive(msg) => {
                    self.events
                        .push(format!("receive:{}", String::from_utf8_lossy(msg)));
                    if self.fail_on.is_some_and(|f| f == msg) {
                        return Err("bad message".into());
                    }
                    if self.panic_on.is_some_and(|p| p == msg) {
                        panic!("cannot handle {}", String::from_utf8_lossy(msg));
                    }
                    if msg.is_empty() {
                        return Ok(Some(Vec::new()));
                    }
                    Ok(Some([&b"<"[..], msg, &b">"[..]].concat()))
                }
                other => {
                    self.events.push(other.kind().to_string());
                    Ok(Some(b"ignored".to_vec()))
                }
            }
        }
    }

    fn peer() -> Peer {
        Peer::Unix(None)
    }

    fn run(stream: &mut Script, max_len: usize) -> Recorder {
        let mut handler = Recorder::default();
        handle_connection(stream, &peer(), Framer::new("\n", max_len), &mut handler);
        handler
    }

    #[test]
    fn dispatches_in_order_and_answers() {
        let mut stream = Script::reads(&[b"hi\nworld12345\nok\n"]);
        let handler = run(&mut stream, 32);

        assert_eq!(
            handler.events,
            vec!["open", "receive:hi", "receive:world12345", "receive:ok", "close"]
        );
        assert_eq!(stream.written, b"<hi><world12345><ok>");
    }

    #[test]
    fn oversized_message_is_skipped() {
        let mut stream = Script::reads(&[b"hi\nworld12345\nok\n"]);
        let handler = run(&mut stream, 10);

        assert_eq!(handler.events, vec!["open", "receive:hi", "receive:ok", "close"]);
        assert_eq!(stream.written, b"<hi><ok>");
    }

    #[test]
    fn silent_connection_still_opens_and_closes() {
        let mut stream = Script::reads(&[]);
        let handler = run(&mut stream, 16);

        assert_eq!(handler.events, vec!["open", "close"]);
        assert!(stream.written.is_empty());
    }

    #[test]
    fn read_error_still_closes() {
        let mut stream = Script::reads(&[b"a\nb"]).then_fail();
        let handler = run(&mut stream, 16);

        assert_eq!(handler.events, vec!["open", "receive:a", "close"]);
    }

    #[test]
    fn write_error_still_closes() {
        let mut stream = Script::reads(&[b"a\n", b"b\n"]);
        stream.fail_writes = true;
        let handler = run(&mut stream, 16);

        assert_eq!(handler.events, vec!["open", "receive:a", "close"]);
    }

    #[test]
    fn handler_error_ends_connection() {
        let mut stream = Script::reads(&[b"a\nboom\nc\n"]);
        let mut handler = Recorder {
            fail_on: Some(&b"boom"[..]),
            ..Default::default()
        };
        handle_connection(&mut stream, &peer(), Framer::new("\n", 16), &mut handler);

        assert_eq!(handler.events, vec!["open", "receive:a", "receive:boom", "close"]);
        assert_eq!(stream.written, b"<a>");
    }

    #[test]
    fn handler_panic_still_closes() {
        let mut stream = Script::reads(&[b"a\ncrash\nc\n"]);
        let mut handler = Recorder {
            panic_on: Some(&b"crash"[..]),
            ..Default::default()
        };
        handle_connection(&mut stream, &peer(), Framer::new("\n", 16), &mut handler);

        assert_eq!(handler.events, vec!["open", "receive:a", "receive:crash", "close"]);
        assert_eq!(stream.written, b"<a>");
    }

    #[test]
    fn panic_message_from_payload() {
        assert_eq!(panic_message(Box::new("owned 1".to_string())), "owned 1");
        assert_eq!(panic_message(Box::new("literal")), "literal");
        assert_eq!(panic_message(Box::new(7_u32)), "unknown panic");
    }

    #[test]
    fn interrupted_read_is_retried() {
        let mut stream = Script::reads(&[b"a\n"]);
        stream
            .reads
            .push_back(Err(io::Error::new(ErrorKind::Interrupted, "signal")));
        stream.reads.push_back(Ok(b"b\n".to_vec()));
        let handler = run(&mut stream, 16);

        assert_eq!(handler.events, vec!["open", "receive:a", "receive:b", "close"]);
        assert_eq!(stream.written, b"<a><b>");
    }

    #[test]
    fn empty_response_writes_nothing() {
        let mut stream = Script::reads(&[b"\nx\n"]);
        let handler = run(&mut stream, 16);

        assert_eq!(handler.events, vec!["open", "receive:", "receive:x", "close"]);
        assert_eq!(stream.written, b"<x>");
    }

    #[test]
    fn unterminated_tail_is_dropped() {
        let mut stream = Script::reads(&[b"one\ntw", b"o"]);
        let handler = run(&mut stream, 16);

        assert_eq!(handler.events, vec!["open", "receive:one", "close"]);
    }

    #[test]
    fn chunking_does_not_change_messages() {
        let whole: &[u8] = b"m1\nm2\nm3\n";
        let byte_at_a_time: Vec<&[u8]> = whole.chunks(1).collect();
        let strategies: [&[&[u8]]; 4] = [
            &[whole],
            &[b"m", b"1", b"\n", b"m2\nm", b"3\n"],
            &[b"m1\n", b"m2\n", b"m3\n"],
            &byte_at_a_time,
        ];

        for reads in strategies {
            let mut stream = Script::reads(reads);
            let handler = run(&mut stream, 16);

            assert_eq!(
                handler.events,
                vec!["open", "receive:m1", "receive:m2", "receive:m3", "close"]
            );
            assert_eq!(stream.written, b"<m1><m2><m3>");
        }
    }
}

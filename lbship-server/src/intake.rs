//! Syslog intake.
//!
//! The load balancer sends each access-log line as the content of a syslog
//! message, over UDP (one message per datagram) or TCP (one message per
//! line). The content is handed to the dispatcher unchanged.

use lbship_core::config::ListenConfig;
use lbship_pipeline::{Dispatcher, SubmitError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest datagram or TCP line accepted.
const MAX_FRAME: usize = 64 * 1024;

/// Extract the message content from an RFC 3164 or RFC 5424 frame.
///
/// Frames without a `<PRI>` header are taken as bare content. Returns `None`
/// when nothing is left after the header.
pub fn extract_content(frame: &str) -> Option<&str> {
    let frame = frame.trim_end_matches(['\r', '\n', '\0']);
    let content = match strip_priority(frame) {
        Some(rest) if rest.starts_with("1 ") => rfc5424_message(&rest[2..]),
        Some(rest) => rfc3164_content(rest),
        None => frame,
    };
    let content = content.trim_start_matches('\u{feff}');
    (!content.trim().is_empty()).then_some(content)
}

/// `<PRI>rest` → `rest`, if the header is well formed.
fn strip_priority(frame: &str) -> Option<&str> {
    let rest = frame.strip_prefix('<')?;
    let end = rest.find('>')?;
    let pri = &rest[..end];
    if pri.is_empty() || pri.len() > 3 || !pri.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(&rest[end + 1..])
}

/// After `<PRI>`: `Mmm dd hh:mm:ss HOST TAG: content`.
fn rfc3164_content(rest: &str) -> &str {
    let after_ts = if has_bsd_timestamp(rest) {
        // The hostname is the token after the timestamp.
        let after = &rest[16..];
        match after.split_once(' ') {
            Some((_host, tail)) => tail,
            None => "",
        }
    } else {
        rest
    };

    // `tag:` or `tag[pid]:` ends at the first ": " if it is a single token.
    match after_ts.split_once(": ") {
        Some((tag, content)) if !tag.is_empty() && !tag.contains(' ') => content,
        _ => after_ts,
    }
}

/// `Oct 11 22:14:15 ` (day space-padded).
fn has_bsd_timestamp(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() > 16
        && b[..3].iter().all(u8::is_ascii_alphabetic)
        && b[3] == b' '
        && (b[4] == b' ' || b[4].is_ascii_digit())
        && b[5].is_ascii_digit()
        && b[6] == b' '
        && b[9] == b':'
        && b[12] == b':'
        && b[15] == b' '
}

/// After `<PRI>1 `: `TIMESTAMP HOST APP PROCID MSGID SD [MSG]`.
fn rfc5424_message(rest: &str) -> &str {
    let mut tail = rest;
    for _ in 0..5 {
        match tail.split_once(' ') {
            Some((_, t)) => tail = t,
            None => return "",
        }
    }
    let msg = if let Some(t) = tail.strip_prefix('-') {
        t
    } else {
        skip_structured_data(tail)
    };
    msg.strip_prefix(' ').unwrap_or(msg)
}

/// Skip consecutive `[id k="v" ...]` elements. Inside a quoted value `\]`,
/// `\"` and `\\` are escapes.
fn skip_structured_data(s: &str) -> &str {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] == b'[' {
        let mut in_quotes = false;
        i += 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if in_quotes => i += 1,
                b'"' => in_quotes = !in_quotes,
                b']' if !in_quotes => break,
                _ => {}
            }
            i += 1;
        }
        i += 1;
    }
    s.get(i.min(s.len())..).unwrap_or("")
}

/// Submit one frame. Returns `false` once the dispatcher is closed.
fn submit_frame(dispatcher: &Dispatcher, frame: &str) -> bool {
    let Some(content) = extract_content(frame) else {
        return true;
    };
    match dispatcher.submit(content.to_string()) {
        Ok(()) | Err(SubmitError::QueueFull) => true,
        Err(SubmitError::Closed) => false,
    }
}

/// Bind the configured listeners and start one task per listener.
pub async fn start(
    config: &ListenConfig,
    dispatcher: Dispatcher,
    stop: watch::Receiver<bool>,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    let addr = config.bind_addr();
    let mut tasks = Vec::new();

    if config.udp {
        let socket = UdpSocket::bind(&addr).await?;
        info!(addr = %socket.local_addr()?, "Syslog UDP intake listening");
        tasks.push(tokio::spawn(run_udp(socket, dispatcher.clone(), stop.clone())));
    }
    if config.tcp {
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "Syslog TCP intake listening");
        tasks.push(tokio::spawn(run_tcp(listener, dispatcher, stop)));
    }
    if tasks.is_empty() {
        warn!("Both UDP and TCP intake are disabled; no lines will be received");
    }
    Ok(tasks)
}

pub async fn run_udp(socket: UdpSocket, dispatcher: Dispatcher, mut stop: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_FRAME];
    loop {
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,
            recv = socket.recv_from(&mut buf) => match recv {
                Ok((n, _)) => {
                    let frame = String::from_utf8_lossy(&buf[..n]);
                    if !submit_frame(&dispatcher, &frame) {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Syslog UDP receive failed"),
            },
        }
    }
    debug!("Syslog UDP intake stopped");
}

pub async fn run_tcp(listener: TcpListener, dispatcher: Dispatcher, mut stop: watch::Receiver<bool>) {
    let conn_stop = stop.clone();
    loop {
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Syslog TCP connection");
                    tokio::spawn(read_stream(stream, dispatcher.clone(), conn_stop.clone()));
                }
                Err(e) => warn!(error = %e, "Syslog TCP accept failed"),
            },
        }
    }
    debug!("Syslog TCP intake stopped");
}

/// One newline-terminated TCP frame.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    Oversized,
    Eof,
}

/// Read up to the next `\n`. Invalid UTF-8 is replaced rather than
/// rejected, and a frame longer than [`MAX_FRAME`] is discarded without
/// being buffered. A final frame without a newline is still returned.
async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Frame> {
    buf.clear();
    let mut oversized = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if oversized {
                Frame::Oversized
            } else if buf.is_empty() {
                Frame::Eof
            } else {
                Frame::Line(String::from_utf8_lossy(buf).into_owned())
            });
        }
        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        if !oversized && buf.len() + used <= MAX_FRAME {
            buf.extend_from_slice(&available[..used]);
        } else {
            oversized = true;
            buf.clear();
        }
        reader.consume(used);
        if done {
            return Ok(if oversized {
                Frame::Oversized
            } else {
                Frame::Line(String::from_utf8_lossy(buf).into_owned())
            });
        }
    }
}

async fn read_stream(stream: TcpStream, dispatcher: Dispatcher, mut stop: watch::Receiver<bool>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break,
            frame = read_frame(&mut reader, &mut buf) => match frame {
                Ok(Frame::Line(frame)) => {
                    if !submit_frame(&dispatcher, &frame) {
                        break;
                    }
                }
                Ok(Frame::Oversized) => {
                    warn!(limit = MAX_FRAME, "Dropping oversized syslog TCP line");
                }
                Ok(Frame::Eof) => break,
                Err(e) => {
                    debug!(error = %e, "Syslog TCP connection closed with error");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbship_observability::PipelineMetrics;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const LINE: &str = "10.0.0.5 || GET || example.com || /a || 200 || 512 || - || curl/7 || node1 || /pools/web || /virtuals/app";

    // ── Frame decoding ───────────────────────────────────────────

    #[test]
    fn rfc3164_frame_yields_content() {
        let frame = format!("<190>Oct 11 22:14:15 lb01 f5: {LINE}");
        assert_eq!(extract_content(&frame), Some(LINE));
    }

    #[test]
    fn rfc3164_tag_with_pid() {
        let frame = format!("<134>Jan  5 01:02:03 lb01 tmm[1234]: {LINE}\n");
        assert_eq!(extract_content(&frame), Some(LINE));
    }

    #[test]
    fn rfc3164_without_timestamp() {
        let frame = format!("<134>f5: {LINE}");
        assert_eq!(extract_content(&frame), Some(LINE));
    }

    #[test]
    fn rfc5424_frame_yields_message() {
        let frame = format!("<165>1 2024-05-01T12:00:00.003Z lb01 f5 - ID47 - {LINE}");
        assert_eq!(extract_content(&frame), Some(LINE));
    }

    #[test]
    fn rfc5424_structured_data_is_skipped() {
        let frame = format!(
            r#"<165>1 2024-05-01T12:00:00Z lb01 f5 - - [meta a="x\]y"][origin ip="10.1.1.1"] {LINE}"#
        );
        assert_eq!(extract_content(&frame), Some(LINE));
    }

    #[test]
    fn rfc5424_bom_is_stripped() {
        let frame = format!("<165>1 - - - - - - \u{feff}{LINE}");
        assert_eq!(extract_content(&frame), Some(LINE));
    }

    #[test]
    fn bare_line_is_content() {
        assert_eq!(extract_content(LINE), Some(LINE));
    }

    #[test]
    fn empty_content_is_ignored() {
        assert_eq!(extract_content("<34>Oct 11 22:14:15 lb01 f5: "), None);
        assert_eq!(extract_content("<165>1 - - - - - -"), None);
        assert_eq!(extract_content("\r\n"), None);
    }

    // ── Listeners ────────────────────────────────────────────────

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(16, Arc::new(PipelineMetrics::disabled()))
    }

    async fn wait_for_len(d: &Dispatcher, n: usize) {
        for _ in 0..200 {
            if d.len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn udp_datagrams_reach_the_queue() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let d = dispatcher();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_udp(socket, d.clone(), stop_rx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(format!("<190>Oct 11 22:14:15 lb01 f5: {LINE}").as_bytes(), addr)
            .await
            .unwrap();

        wait_for_len(&d, 1).await;
        assert_eq!(d.receiver().try_recv().unwrap(), LINE);

        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_lines_reach_the_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let d = dispatcher();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_tcp(listener, d.clone(), stop_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let payload = format!("<190>Oct 11 22:14:15 lb01 f5: {LINE}\n<190>Oct 11 22:14:16 lb01 f5: {LINE}\n");
        client.write_all(payload.as_bytes()).await.unwrap();
        client.flush().await.unwrap();

        wait_for_len(&d, 2).await;
        assert_eq!(d.len(), 2);

        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_serves_several_connections_then_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let d = dispatcher();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_tcp(listener, d.clone(), stop_rx));

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        first.write_all(format!("{LINE}\n").as_bytes()).await.unwrap();
        second.write_all(format!("{LINE}\n").as_bytes()).await.unwrap();

        wait_for_len(&d, 2).await;
        assert_eq!(d.len(), 2);

        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn tcp_invalid_utf8_line_does_not_end_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let d = dispatcher();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_tcp(listener, d.clone(), stop_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (head, tail) = LINE.split_once("/a ").unwrap();
        let mut payload = format!("{head}/caf").into_bytes();
        payload.push(0xe9);
        payload.extend_from_slice(format!(" {tail}\n").as_bytes());
        payload.extend_from_slice(format!("{LINE}\n").as_bytes());
        client.write_all(&payload).await.unwrap();

        wait_for_len(&d, 2).await;
        let rx = d.receiver();
        assert!(rx.try_recv().unwrap().contains("/caf\u{fffd}"));
        assert_eq!(rx.try_recv().unwrap(), LINE);

        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_tcp_line_is_skipped() {
        let mut input = vec![b'x'; MAX_FRAME + 10];
        input.push(b'\n');
        input.extend_from_slice(format!("{LINE}\n{LINE}").as_bytes());
        let mut reader = BufReader::with_capacity(1024, input.as_slice());
        let mut buf = Vec::new();

        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Oversized);
        assert_eq!(
            read_frame(&mut reader, &mut buf).await.unwrap(),
            Frame::Line(format!("{LINE}\n"))
        );
        assert_eq!(
            read_frame(&mut reader, &mut buf).await.unwrap(),
            Frame::Line(LINE.to_string())
        );
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Eof);
    }

    #[tokio::test]
    async fn intake_stops_when_dispatcher_closes() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let d = dispatcher();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_udp(socket, d.clone(), stop_rx));
        d.close();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(LINE.as_bytes(), addr).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}

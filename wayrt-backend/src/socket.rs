//! Wayland socket manipulation

use std::collections::VecDeque;
use std::io::{ErrorKind, IoSlice, IoSliceMut, Result as IoResult};
use std::mem::MaybeUninit;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use rustix::event::{poll, PollFd, PollFlags, Timespec};
use rustix::io::retry_on_intr;
use rustix::net::{
    recvmsg, send, sendmsg, RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags,
    SendAncillaryBuffer, SendAncillaryMessage, SendFlags,
};

use crate::protocol::{ArgumentType, Message};

use super::wire::{
    parse_header, parse_message, write_to_buffers, MessageParseError, MessageWriteError,
};

/// Maximum number of FD that can be sent in a single socket message
pub const MAX_FDS_OUT: usize = 28;
/// Maximum number of bytes that can be sent in a single socket message
pub const MAX_BYTES_OUT: usize = 4096;

/*
 * Socket
 */

/// A wayland socket
#[derive(Debug)]
pub struct Socket {
    stream: UnixStream,
}

impl Socket {
    /// Send a single message to the socket
    ///
    /// A single socket message can contain several wayland messages
    ///
    /// The `fds` slice should not be longer than `MAX_FDS_OUT`, and the `bytes`
    /// slice should not be longer than `MAX_BYTES_OUT` otherwise the receiving
    /// end may lose some data.
    pub fn send_msg(&self, bytes: &[u8], fds: &[OwnedFd]) -> IoResult<usize> {
        let flags = SendFlags::DONTWAIT | SendFlags::NOSIGNAL;

        if !fds.is_empty() {
            let iov = [IoSlice::new(bytes)];
            let mut cmsg_space =
                vec![MaybeUninit::uninit(); rustix::cmsg_space!(ScmRights(fds.len()))];
            let mut cmsg_buffer = SendAncillaryBuffer::new(&mut cmsg_space);
            let fds =
                unsafe { slice::from_raw_parts(fds.as_ptr() as *const BorrowedFd, fds.len()) };
            cmsg_buffer.push(SendAncillaryMessage::ScmRights(fds));
            Ok(retry_on_intr(|| sendmsg(self, &iov, &mut cmsg_buffer, flags))?)
        } else {
            Ok(retry_on_intr(|| send(self, bytes, flags))?)
        }
    }

    /// Receive a single message from the socket
    ///
    /// Return the number of bytes received, the received fds are appended to `fds`.
    ///
    /// Errors with `WouldBlock` is no message is available.
    ///
    /// A single socket message can contain several wayland messages.
    pub fn rcv_msg(&self, buffer: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> IoResult<usize> {
        let flags = RecvFlags::DONTWAIT | RecvFlags::CMSG_CLOEXEC;

        let mut cmsg_space = [MaybeUninit::uninit(); rustix::cmsg_space!(ScmRights(MAX_FDS_OUT))];
        let mut cmsg_buffer = RecvAncillaryBuffer::new(&mut cmsg_space);
        let mut iov = [IoSliceMut::new(buffer)];
        let msg = retry_on_intr(|| recvmsg(&self.stream, &mut iov[..], &mut cmsg_buffer, flags))?;

        let received_fds = cmsg_buffer
            .drain()
            .filter_map(|cmsg| match cmsg {
                RecvAncillaryMessage::ScmRights(fds) => Some(fds),
                _ => None,
            })
            .flatten();
        fds.extend(received_fds);
        Ok(msg.bytes)
    }

    /// Block until the socket is readable or the timeout expires
    ///
    /// Returns `false` if the timeout expired. A closed or shut down socket is
    /// reported readable, so that the following read observes the closure.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> IoResult<bool> {
        self.wait_for(PollFlags::IN | PollFlags::ERR, timeout)
    }

    /// Block until the socket can accept more data or the timeout expires
    ///
    /// A closed or shut down socket is reported writable, the following send
    /// then fails with `EPIPE`.
    pub fn wait_writable(&self, timeout: Option<Duration>) -> IoResult<bool> {
        self.wait_for(PollFlags::OUT | PollFlags::ERR, timeout)
    }

    fn wait_for(&self, flags: PollFlags, timeout: Option<Duration>) -> IoResult<bool> {
        let timespec = timeout.map(|d| Timespec {
            tv_sec: d.as_secs() as _,
            tv_nsec: d.subsec_nanos() as _,
        });
        let mut fds = [PollFd::new(&self.stream, flags)];
        let ready = retry_on_intr(|| poll(&mut fds, timespec.as_ref()))?;
        Ok(ready > 0)
    }

    /// Shut down both directions of the connection
    ///
    /// Any thread blocked waiting on the socket is woken up and reads end-of-stream.
    pub fn shutdown(&self) {
        // this only fails if the socket is already disconnected
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

impl From<UnixStream> for Socket {
    fn from(stream: UnixStream) -> Self {
        Self { stream }
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Wrap a connected stream into its buffered reading and writing halves
pub fn buffered(stream: UnixStream) -> (BufferedReader, BufferedWriter) {
    let socket = Arc::new(Socket::from(stream));
    (BufferedReader::new(socket.clone()), BufferedWriter::new(socket))
}

/*
 * BufferedWriter
 */

/// The writing half of a socket, buffering outgoing messages
#[derive(Debug)]
pub struct BufferedWriter {
    socket: Arc<Socket>,
    out_data: Buffer<u8>,
    out_fds: Vec<OwnedFd>,
}

impl BufferedWriter {
    /// Wrap a Socket into a buffered writer
    pub fn new(socket: Arc<Socket>) -> Self {
        Self { socket, out_data: Buffer::new(MAX_BYTES_OUT), out_fds: Vec::new() }
    }

    /// Access the underlying socket
    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    /// Flush the contents of the outgoing buffer into the socket
    pub fn flush(&mut self) -> IoResult<()> {
        let bytes = self.out_data.get_contents();
        let fds = &self.out_fds;
        let mut written_bytes = 0;
        let mut written_fds = 0;
        let mut ret = Ok(());
        while written_bytes < bytes.len() {
            let mut bytes_to_write = &bytes[written_bytes..];
            let mut fds_to_write = &fds[written_fds..];
            if fds_to_write.len() > MAX_FDS_OUT {
                // While we need to send more than MAX_FDS_OUT fds,
                // send them with separate send_msg calls in MAX_FDS_OUT sized chunks
                // together with 1 byte of normal data, like libwayland does
                // in wl_connection_flush.
                bytes_to_write = &bytes_to_write[..1];
                fds_to_write = &fds_to_write[..MAX_FDS_OUT];
            }
            if bytes_to_write.len() > MAX_BYTES_OUT {
                bytes_to_write = &bytes_to_write[..MAX_BYTES_OUT];
            }
            match self.socket.send_msg(bytes_to_write, fds_to_write) {
                Ok(0) => {
                    // a non-zero sized send should never return 0
                    written_fds += fds_to_write.len();
                    break;
                }
                Ok(count) => {
                    written_bytes += count;
                    written_fds += fds_to_write.len();
                }
                Err(error) => {
                    ret = Err(error);
                    break;
                }
            }
        }
        // remove what was sent from the outgoing buffers
        self.out_data.offset(written_bytes);
        self.out_data.move_to_front();
        self.out_fds.drain(..written_fds);
        ret
    }

    // attempts to write a message in the internal out buffers,
    // returns false if there is not enough space in the buffer
    fn attempt_write_message(&mut self, msg: &Message<u32, RawFd>) -> IoResult<bool> {
        match write_to_buffers(msg, self.out_data.get_writable_storage(), &mut self.out_fds) {
            Ok(bytes_out) => {
                self.out_data.advance(bytes_out);
                Ok(true)
            }
            Err(MessageWriteError::BufferTooSmall) => Ok(false),
            Err(MessageWriteError::MessageTooLarge) => Err(rustix::io::Errno::TOOBIG.into()),
            Err(MessageWriteError::DupFdFailed(e)) => Err(e),
        }
    }

    /// Write a message to the outgoing buffer
    ///
    /// The message is always written whole. This method flushes the internal
    /// buffer if it is full, and blocks until the socket accepts more data when the
    /// peer is slow to read. If the message is too big to be transmitted at all,
    /// the error `E2BIG` is returned.
    pub fn write_message(&mut self, msg: &Message<u32, RawFd>) -> IoResult<()> {
        while !self.attempt_write_message(msg)? {
            if !self.has_pending() {
                // the buffer is empty and the message still does not fit
                return Err(rustix::io::Errno::TOOBIG.into());
            }
            // not enough space in the buffer, flush it
            match self.flush() {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.socket.wait_writable(None)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Whether there are buffered bytes not yet sent
    pub fn has_pending(&self) -> bool {
        !self.out_data.get_contents().is_empty()
    }
}

/*
 * BufferedReader
 */

/// The reading half of a socket, buffering incoming messages
#[derive(Debug)]
pub struct BufferedReader {
    socket: Arc<Socket>,
    in_data: Buffer<u8>,
    in_fds: VecDeque<OwnedFd>,
}

impl BufferedReader {
    /// Wrap a Socket into a buffered reader
    pub fn new(socket: Arc<Socket>) -> Self {
        Self {
            socket,
            // twice as big as a socket message in order to be able to store leftover data
            in_data: Buffer::new(2 * MAX_BYTES_OUT),
            in_fds: VecDeque::new(),
        }
    }

    /// Access the underlying socket
    pub fn socket(&self) -> &Arc<Socket> {
        &self.socket
    }

    /// Try to fill the incoming buffers of this socket, to prepare
    /// a new round of parsing.
    ///
    /// Errors with `WouldBlock` if no data is available, and with `EPIPE` once the
    /// other end closed the connection.
    pub fn fill_incoming_buffers(&mut self) -> IoResult<()> {
        self.in_data.move_to_front();
        let in_bytes = {
            let bytes = self.in_data.get_writable_storage();
            self.socket.rcv_msg(bytes, &mut self.in_fds)?
        };
        if in_bytes == 0 {
            // the other end of the socket was closed
            return Err(rustix::io::Errno::PIPE.into());
        }
        self.in_data.advance(in_bytes);
        Ok(())
    }

    /// Peek at the header of the next message
    ///
    /// Returns the sender id, opcode and total size of the message.
    pub fn peek_header(&self) -> Result<(u32, u16, usize), MessageParseError> {
        parse_header(self.in_data.get_contents())
    }

    /// Drop the next message without parsing it
    ///
    /// Errors with `MissingData` if the message is not fully buffered yet. The file
    /// descriptors it may carry cannot be identified and are left in the queue.
    pub fn skip_message(&mut self) -> Result<(), MessageParseError> {
        let (_, _, size) = self.peek_header()?;
        if size > self.in_data.get_contents().len() {
            return Err(MessageParseError::MissingData);
        }
        self.in_data.offset(size);
        Ok(())
    }

    /// Read and deserialize the next message using the provided signature
    pub fn read_one_message(
        &mut self,
        signature: &[ArgumentType],
    ) -> Result<Message<u32, OwnedFd>, MessageParseError> {
        let data = self.in_data.get_contents();
        let (msg, rest) = parse_message(data, signature, &mut self.in_fds)?;
        let read = data.len() - rest.len();
        self.in_data.offset(read);
        Ok(msg)
    }

    /// Whether some bytes are buffered and not yet parsed
    pub fn has_buffered_data(&self) -> bool {
        !self.in_data.get_contents().is_empty()
    }
}

/*
 * Buffer
 */
#[derive(Debug)]
struct Buffer<T: Copy> {
    storage: Vec<T>,
    occupied: usize,
    offset: usize,
}

impl<T: Copy + Default> Buffer<T> {
    fn new(size: usize) -> Self {
        Self { storage: vec![T::default(); size], occupied: 0, offset: 0 }
    }

    /// Advance the internal counter of occupied space
    fn advance(&mut self, bytes: usize) {
        self.occupied += bytes;
    }

    /// Advance the read offset of current occupied space
    fn offset(&mut self, bytes: usize) {
        self.offset += bytes;
    }

    /// Get the current contents of the occupied space of the buffer
    fn get_contents(&self) -> &[T] {
        &self.storage[(self.offset)..(self.occupied)]
    }

    /// Get mutable access to the unoccupied space of the buffer
    fn get_writable_storage(&mut self) -> &mut [T] {
        &mut self.storage[(self.occupied)..]
    }

    /// Move the unread contents of the buffer to the front, to ensure
    /// maximal write space availability
    fn move_to_front(&mut self) {
        if self.occupied > self.offset {
            self.storage.copy_within((self.offset)..(self.occupied), 0)
        }
        self.occupied -= self.offset;
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AllowNull, Argument, ArgumentType, Message};

    use std::ffi::CString;
    use std::os::unix::io::IntoRawFd;

    use smallvec::smallvec;

    fn same_file(a: BorrowedFd, b: BorrowedFd) -> bool {
        let stat1 = rustix::fs::fstat(a).unwrap();
        let stat2 = rustix::fs::fstat(b).unwrap();
        stat1.st_dev == stat2.st_dev && stat1.st_ino == stat2.st_ino
    }

    // if arguments contain FDs, check that the fd point to
    // the same file, rather than are the same number.
    fn assert_eq_msgs<Fd: AsRawFd + std::fmt::Debug>(
        msg1: &Message<u32, Fd>,
        msg2: &Message<u32, Fd>,
    ) {
        assert_eq!(msg1.sender_id, msg2.sender_id);
        assert_eq!(msg1.opcode, msg2.opcode);
        assert_eq!(msg1.args.len(), msg2.args.len());
        for (arg1, arg2) in msg1.args.iter().zip(msg2.args.iter()) {
            if let (Argument::Fd(fd1), Argument::Fd(fd2)) = (arg1, arg2) {
                let fd1 = unsafe { BorrowedFd::borrow_raw(fd1.as_raw_fd()) };
                let fd2 = unsafe { BorrowedFd::borrow_raw(fd2.as_raw_fd()) };
                assert!(same_file(fd1, fd2));
            } else {
                assert_eq!(arg1, arg2);
            }
        }
    }

    fn pair() -> (BufferedWriter, BufferedReader) {
        let (client, server) = UnixStream::pair().unwrap();
        let (_, writer) = buffered(client);
        let (reader, _) = buffered(server);
        (writer, reader)
    }

    #[test]
    fn write_read_cycle() {
        let msg = Message {
            sender_id: 42,
            opcode: 7,
            args: smallvec![
                Argument::Uint(3),
                Argument::Fixed(-89),
                Argument::Str(Some(Box::new(CString::new(&b"I like trains!"[..]).unwrap()))),
                Argument::Array(vec![1, 2, 3, 4, 5, 6, 7, 8, 9].into()),
                Argument::Object(88),
                Argument::NewId(56),
                Argument::Int(-25),
            ],
        };

        let (mut client, mut server) = pair();
        client.write_message(&msg).unwrap();
        client.flush().unwrap();

        static SIGNATURE: &[ArgumentType] = &[
            ArgumentType::Uint,
            ArgumentType::Fixed,
            ArgumentType::Str(AllowNull::No),
            ArgumentType::Array,
            ArgumentType::Object(AllowNull::No),
            ArgumentType::NewId,
            ArgumentType::Int,
        ];

        server.fill_incoming_buffers().unwrap();
        assert_eq!(server.peek_header().unwrap(), (42, 7, 64));
        let ret_msg = server.read_one_message(SIGNATURE).unwrap();
        assert!(!server.has_buffered_data());
        assert_eq_msgs(&msg.map_fd(|fd| fd.as_raw_fd()), &ret_msg.map_fd(IntoRawFd::into_raw_fd));
    }

    #[test]
    fn write_read_cycle_fd() {
        let msg = Message {
            sender_id: 42,
            opcode: 7,
            args: smallvec![
                Argument::Fd(1), // stdout
                Argument::Fd(0), // stdin
            ],
        };

        let (mut client, mut server) = pair();
        client.write_message(&msg).unwrap();
        client.flush().unwrap();

        static SIGNATURE: &[ArgumentType] = &[ArgumentType::Fd, ArgumentType::Fd];

        server.fill_incoming_buffers().unwrap();
        let ret_msg = server.read_one_message(SIGNATURE).unwrap();
        assert_eq_msgs(&msg.map_fd(|fd| fd.as_raw_fd()), &ret_msg.map_fd(IntoRawFd::into_raw_fd));
    }

    #[test]
    fn write_read_cycle_multiple() {
        let messages = vec![
            Message {
                sender_id: 42,
                opcode: 0,
                args: smallvec![
                    Argument::Int(42),
                    Argument::Str(Some(Box::new(CString::new(&b"I like trains"[..]).unwrap()))),
                ],
            },
            Message {
                sender_id: 42,
                opcode: 1,
                args: smallvec![
                    Argument::Fd(1), // stdout
                    Argument::Fd(0), // stdin
                ],
            },
            Message {
                sender_id: 42,
                opcode: 2,
                args: smallvec![
                    Argument::Uint(3),
                    Argument::Fd(2), // stderr
                ],
            },
        ];

        static SIGNATURES: &[&[ArgumentType]] = &[
            &[ArgumentType::Int, ArgumentType::Str(AllowNull::No)],
            &[ArgumentType::Fd, ArgumentType::Fd],
            &[ArgumentType::Uint, ArgumentType::Fd],
        ];

        let (mut client, mut server) = pair();
        for msg in &messages {
            client.write_message(msg).unwrap();
        }
        client.flush().unwrap();

        server.fill_incoming_buffers().unwrap();

        let mut recv_msgs = Vec::new();
        while let Ok((_, opcode, _)) = server.peek_header() {
            recv_msgs.push(server.read_one_message(SIGNATURES[opcode as usize]).unwrap());
        }
        assert_eq!(recv_msgs.len(), 3);
        for (msg1, msg2) in messages.into_iter().zip(recv_msgs.into_iter()) {
            assert_eq_msgs(&msg1.map_fd(|fd| fd.as_raw_fd()), &msg2.map_fd(IntoRawFd::into_raw_fd));
        }
    }

    #[test]
    fn many_fds_are_sent_in_chunks() {
        let count = 2 * MAX_FDS_OUT + 3;
        let msg: Message<u32, RawFd> = Message {
            sender_id: 7,
            opcode: 0,
            args: std::iter::repeat(Argument::Fd(2)).take(count).collect(),
        };
        let signature = vec![ArgumentType::Fd; count];

        let (mut client, mut server) = pair();
        client.write_message(&msg).unwrap();
        client.flush().unwrap();
        assert!(!client.has_pending());

        let ret = loop {
            match server.read_one_message(&signature) {
                Ok(msg) => break msg,
                Err(MessageParseError::MissingData) | Err(MessageParseError::MissingFD) => {
                    server.fill_incoming_buffers().unwrap()
                }
                Err(MessageParseError::Malformed) => panic!("malformed message"),
            }
        };
        assert_eq!(ret.args.len(), count);
    }

    #[test]
    fn skip_unknown_message() {
        let first: Message<u32, RawFd> =
            Message { sender_id: 9, opcode: 3, args: smallvec![Argument::Uint(1), Argument::Int(2)] };
        let second: Message<u32, RawFd> =
            Message { sender_id: 10, opcode: 0, args: smallvec![Argument::Uint(5)] };
        let (mut client, mut server) = pair();
        client.write_message(&first).unwrap();
        client.write_message(&second).unwrap();
        client.flush().unwrap();
        server.fill_incoming_buffers().unwrap();

        server.skip_message().unwrap();
        let msg = server.read_one_message(&[ArgumentType::Uint]).unwrap();
        assert_eq!(msg.sender_id, 10);
        assert!(matches!(msg.args[..], [Argument::Uint(5)]));
    }

    #[test]
    fn closed_peer_reports_epipe() {
        let (client, server) = UnixStream::pair().unwrap();
        let (mut reader, _) = buffered(server);
        drop(client);
        assert!(reader.socket().wait_readable(None).unwrap());
        let err = reader.fill_incoming_buffers().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(rustix::io::Errno::PIPE.raw_os_error()));
    }

    #[test]
    fn wait_readable_times_out() {
        let (_client, server) = UnixStream::pair().unwrap();
        let (reader, _) = buffered(server);
        assert!(!reader.socket().wait_readable(Some(Duration::from_millis(10))).unwrap());
    }

    // more data than the socket can hold, the reader only starts after a while
    #[test]
    fn full_socket_waits_for_the_reader() {
        const COUNT: usize = 2000;
        let (mut writer, mut reader) = pair();
        let msg: Message<u32, RawFd> = Message {
            sender_id: 3,
            opcode: 1,
            args: smallvec![Argument::Array(Box::new(vec![7; 1000]))],
        };

        let reading = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut received = 0;
            while received < COUNT {
                match reader.read_one_message(&[ArgumentType::Array]) {
                    Ok(msg) => {
                        assert_eq!((msg.sender_id, msg.opcode), (3, 1));
                        received += 1;
                    }
                    Err(MessageParseError::MissingData) => {
                        assert!(reader.socket().wait_readable(Some(Duration::from_secs(5))).unwrap());
                        reader.fill_incoming_buffers().unwrap();
                    }
                    Err(e) => panic!("{e}"),
                }
            }
        });

        for _ in 0..COUNT {
            writer.write_message(&msg).unwrap();
        }
        while writer.has_pending() {
            match writer.flush() {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    writer.socket().wait_writable(None).unwrap();
                }
                Err(e) => panic!("{e}"),
            }
        }
        reading.join().unwrap();
    }

    #[test]
    fn oversized_message_is_refused() {
        let (mut writer, _reader) = pair();
        let msg: Message<u32, RawFd> = Message {
            sender_id: 3,
            opcode: 1,
            args: smallvec![Argument::Array(Box::new(vec![0; 2 * MAX_BYTES_OUT]))],
        };
        let err = writer.write_message(&msg).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(rustix::io::Errno::TOOBIG.raw_os_error()));
    }
}

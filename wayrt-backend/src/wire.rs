//! Types and routines used to manipulate arguments from the wire format

use std::collections::VecDeque;
use std::ffi::CStr;
use std::os::unix::io::{BorrowedFd, OwnedFd, RawFd};

use smallvec::SmallVec;

use crate::protocol::{AllowNull, Argument, ArgumentType, Message, INLINE_ARGS};

/// Size of the header of every message: object id, then opcode and size packed in one word
pub const HEADER_SIZE: usize = 8;

/// Maximum size in bytes of a single message, header included
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Error generated when trying to serialize a message into buffers
#[derive(Debug)]
pub enum MessageWriteError {
    /// The buffer is too small to hold the message contents
    BufferTooSmall,
    /// The message is bigger than what a single wayland message can hold
    MessageTooLarge,
    /// The message contains a FD that could not be dup-ed
    DupFdFailed(std::io::Error),
}

impl std::error::Error for MessageWriteError {}

impl std::fmt::Display for MessageWriteError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> Result<(), ::std::fmt::Error> {
        match self {
            Self::BufferTooSmall => {
                f.write_str("The provided buffer is too small to hold message content.")
            }
            Self::MessageTooLarge => {
                write!(f, "The message is larger than the maximum of {MAX_MESSAGE_SIZE} bytes.")
            }
            Self::DupFdFailed(e) => {
                write!(
                    f,
                    "The message contains a file descriptor that could not be dup()-ed ({e})."
                )
            }
        }
    }
}

/// Error generated when trying to deserialize a message from buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageParseError {
    /// The message references a FD but the buffer FD is empty
    MissingFD,
    /// More data is needed to deserialize the message
    MissingData,
    /// The message is malformed and cannot be parsed
    Malformed,
}

impl std::error::Error for MessageParseError {}

impl std::fmt::Display for MessageParseError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> Result<(), ::std::fmt::Error> {
        match *self {
            Self::MissingFD => {
                f.write_str("The message references a FD but the buffer FD is empty.")
            }
            Self::MissingData => f.write_str("More data is needed to deserialize the message"),
            Self::Malformed => f.write_str("The message is malformed and cannot be parsed"),
        }
    }
}

#[inline]
fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

#[inline]
fn read_word(bytes: &[u8]) -> u32 {
    u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Compute the encoded size of a message, header included
pub fn message_size<Id, Fd>(msg: &Message<Id, Fd>) -> usize {
    HEADER_SIZE
        + msg
            .args
            .iter()
            .map(|arg| match arg {
                Argument::Str(Some(s)) => 4 + padded_len(s.as_bytes_with_nul().len()),
                Argument::Str(None) => 4,
                Argument::Array(a) => 4 + padded_len(a.len()),
                Argument::Fd(_) => 0,
                _ => 4,
            })
            .sum::<usize>()
}

/// Serialize the contents of this message into provided buffers
///
/// Returns the number of bytes written in the payload buffer. The file descriptors
/// of the message are `dup()`-ed and appended to `fds` in signature order, so the
/// caller keeps ownership of its own.
///
/// Nothing is written if an error is returned.
pub fn write_to_buffers(
    msg: &Message<u32, RawFd>,
    payload: &mut [u8],
    fds: &mut Vec<OwnedFd>,
) -> Result<usize, MessageWriteError> {
    let size = message_size(msg);
    if size > MAX_MESSAGE_SIZE {
        return Err(MessageWriteError::MessageTooLarge);
    }
    if size > payload.len() {
        return Err(MessageWriteError::BufferTooSmall);
    }

    // dup the fds first, so that a failure leaves the buffers untouched
    let mut pending_fds = SmallVec::<[OwnedFd; 4]>::new();
    for arg in &msg.args {
        if let Argument::Fd(fd) = *arg {
            let dup_fd = unsafe { BorrowedFd::borrow_raw(fd) }
                .try_clone_to_owned()
                .map_err(MessageWriteError::DupFdFailed)?;
            pending_fds.push(dup_fd);
        }
    }

    let mut cursor = 0;
    let put_word = |payload: &mut [u8], cursor: &mut usize, word: u32| {
        payload[*cursor..*cursor + 4].copy_from_slice(&word.to_ne_bytes());
        *cursor += 4;
    };
    let put_bytes = |payload: &mut [u8], cursor: &mut usize, bytes: &[u8]| {
        let padded = padded_len(bytes.len());
        payload[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
        payload[*cursor + bytes.len()..*cursor + padded].fill(0);
        *cursor += padded;
    };

    put_word(payload, &mut cursor, msg.sender_id);
    put_word(payload, &mut cursor, ((size as u32) << 16) | u32::from(msg.opcode));

    for arg in &msg.args {
        match *arg {
            Argument::Int(i) => put_word(payload, &mut cursor, i as u32),
            Argument::Uint(u) => put_word(payload, &mut cursor, u),
            Argument::Fixed(f) => put_word(payload, &mut cursor, f as u32),
            Argument::Str(Some(ref s)) => {
                let bytes = s.as_bytes_with_nul();
                put_word(payload, &mut cursor, bytes.len() as u32);
                put_bytes(payload, &mut cursor, bytes);
            }
            Argument::Str(None) => put_word(payload, &mut cursor, 0),
            Argument::Object(o) => put_word(payload, &mut cursor, o),
            Argument::NewId(n) => put_word(payload, &mut cursor, n),
            Argument::Array(ref a) => {
                put_word(payload, &mut cursor, a.len() as u32);
                put_bytes(payload, &mut cursor, a);
            }
            Argument::Fd(_) => {}
        }
    }
    debug_assert_eq!(cursor, size);

    fds.extend(pending_fds);
    Ok(size)
}

/// Read and validate the header of the message at the front of `raw`
///
/// Returns the sender id, the opcode and the total size in bytes of the message.
pub fn parse_header(raw: &[u8]) -> Result<(u32, u16, usize), MessageParseError> {
    if raw.len() < HEADER_SIZE {
        return Err(MessageParseError::MissingData);
    }
    let sender_id = read_word(&raw[0..4]);
    let word_2 = read_word(&raw[4..8]);
    let opcode = (word_2 & 0x0000_FFFF) as u16;
    let size = (word_2 >> 16) as usize;
    if size < HEADER_SIZE || size % 4 != 0 || size > MAX_MESSAGE_SIZE {
        return Err(MessageParseError::Malformed);
    }
    Ok((sender_id, opcode, size))
}

/// Attempts to parse a single wayland message with the given signature.
///
/// If the buffer contains several messages, only the first one will be parsed,
/// and the unused tail of the buffer is returned. File descriptors are taken
/// from the front of `fds` in signature order, and only if the parsing succeeds.
///
/// Errors with `MissingData` or `MissingFD` if the buffers do not hold the whole
/// message yet, and with `Malformed` if the message can never be parsed.
pub fn parse_message<'a>(
    raw: &'a [u8],
    signature: &[ArgumentType],
    fds: &mut VecDeque<OwnedFd>,
) -> Result<(Message<u32, OwnedFd>, &'a [u8]), MessageParseError> {
    // helper function to read the length-prefixed byte contents of strings and arrays
    fn read_array_from_payload(payload: &[u8]) -> Result<(&[u8], &[u8]), MessageParseError> {
        if payload.len() < 4 {
            return Err(MessageParseError::Malformed);
        }
        let len = read_word(payload) as usize;
        let payload = &payload[4..];
        let padded = padded_len(len);
        if padded > payload.len() {
            return Err(MessageParseError::Malformed);
        }
        let (contents, rest) = payload.split_at(padded);
        let (array, padding) = contents.split_at(len);
        if padding.iter().any(|&b| b != 0) {
            return Err(MessageParseError::Malformed);
        }
        Ok((array, rest))
    }

    let (sender_id, opcode, size) = parse_header(raw)?;
    if size > raw.len() {
        return Err(MessageParseError::MissingData);
    }

    let fd_count = signature.iter().filter(|arg| matches!(arg, ArgumentType::Fd)).count();
    if fd_count > fds.len() {
        return Err(MessageParseError::MissingFD);
    }

    let (frame, rest) = raw.split_at(size);
    let mut payload = &frame[HEADER_SIZE..];
    let mut args: SmallVec<[Option<Argument<u32, OwnedFd>>; INLINE_ARGS]> = SmallVec::with_capacity(signature.len());
    let mut fd_args = 0;

    for argtype in signature {
        let arg = match *argtype {
            ArgumentType::Fd => {
                // fds are out of band, they are only taken once the whole message is valid
                fd_args += 1;
                None
            }
            ArgumentType::Str(allow_null) => {
                let (bytes, tail) = read_array_from_payload(payload)?;
                payload = tail;
                if bytes.is_empty() {
                    if allow_null == AllowNull::No {
                        return Err(MessageParseError::Malformed);
                    }
                    Some(Argument::Str(None))
                } else {
                    let s = CStr::from_bytes_with_nul(bytes)
                        .map_err(|_| MessageParseError::Malformed)?;
                    if s.to_str().is_err() {
                        return Err(MessageParseError::Malformed);
                    }
                    Some(Argument::Str(Some(Box::new(s.into()))))
                }
            }
            ArgumentType::Array => {
                let (bytes, tail) = read_array_from_payload(payload)?;
                payload = tail;
                Some(Argument::Array(Box::new(bytes.into())))
            }
            _ => {
                if payload.len() < 4 {
                    return Err(MessageParseError::Malformed);
                }
                let word = read_word(payload);
                payload = &payload[4..];
                Some(match *argtype {
                    ArgumentType::Int => Argument::Int(word as i32),
                    ArgumentType::Uint => Argument::Uint(word),
                    ArgumentType::Fixed => Argument::Fixed(word as i32),
                    ArgumentType::Object(AllowNull::No) | ArgumentType::NewId if word == 0 => {
                        return Err(MessageParseError::Malformed)
                    }
                    ArgumentType::Object(_) => Argument::Object(word),
                    ArgumentType::NewId => Argument::NewId(word),
                    ArgumentType::Str(_) | ArgumentType::Array | ArgumentType::Fd => {
                        unreachable!()
                    }
                })
            }
        };
        args.push(arg);
    }

    if !payload.is_empty() {
        // the declared size does not match the signature
        return Err(MessageParseError::Malformed);
    }

    debug_assert_eq!(fd_args, fd_count);
    let args = args
        .into_iter()
        .map(|arg| match arg {
            Some(arg) => arg,
            // we checked there were enough fds beforehand
            None => Argument::Fd(fds.pop_front().unwrap()),
        })
        .collect();

    Ok((Message { sender_id, opcode, args }, rest))
}

/// Decode exactly one message occupying the whole of `frame`
///
/// Unlike [`parse_message`], the input is a complete frame by contract, so a frame
/// that announces more bytes than provided or that is followed by trailing bytes is
/// `Malformed`.
pub fn decode_message(
    frame: &[u8],
    signature: &[ArgumentType],
    fds: &mut VecDeque<OwnedFd>,
) -> Result<Message<u32, OwnedFd>, MessageParseError> {
    match parse_message(frame, signature, fds) {
        Ok((msg, [])) => Ok(msg),
        Ok(_) | Err(MessageParseError::MissingData) => Err(MessageParseError::Malformed),
        Err(e) => Err(e),
    }
}

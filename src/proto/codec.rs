// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CollectorError, Result};

/// Upper bound for a single word on the wire. Anything larger is a framing
/// violation and kills the session.
pub const MAX_WORD_LEN: u32 = 16 * 1024 * 1024;

/// Appends the variable-length size prefix of a word.
///
/// First-byte ranges select the encoding width:
/// 1 byte up to 0x7F, 2 bytes up to 0x3FFF, 3 bytes up to 0x1F_FFFF,
/// 4 bytes up to 0x0FFF_FFFF, and a 0xF0 marker followed by four
/// big-endian bytes beyond that.
pub fn encode_length(len: u32, out: &mut BytesMut) {
    if len < 0x80 {
        out.put_u8(len as u8);
    } else if len < 0x4000 {
        out.put_u16(len as u16 | 0x8000);
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        out.put_u8((v >> 16) as u8);
        out.put_u16(v as u16);
    } else if len < 0x1000_0000 {
        out.put_u32(len | 0xE000_0000);
    } else {
        out.put_u8(0xF0);
        out.put_u32(len);
    }
}

/// Serializes a full sentence: each word length-prefixed, then the
/// zero-length terminator word.
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Bytes {
    let mut out = BytesMut::with_capacity(
        words.iter().map(|w| w.as_ref().len() + 5).sum::<usize>() + 1,
    );
    for word in words {
        let bytes = word.as_ref().as_bytes();
        encode_length(bytes.len() as u32, &mut out);
        out.put_slice(bytes);
    }
    out.put_u8(0);
    out.freeze()
}

/// Reads one length prefix from the socket.
pub async fn read_length<R>(reader: &mut R) -> Result<u32>
where R: AsyncRead + Unpin {
    let b0 = read_u8(reader).await?;

    let len = match b0 {
        0x00..=0x7F => u32::from(b0),
        0x80..=0xBF => {
            let b1 = read_u8(reader).await?;
            (u32::from(b0 & 0x3F) << 8) | u32::from(b1)
        },
        0xC0..=0xDF => {
            let mut rest = [0u8; 2];
            read_exact(reader, &mut rest).await?;
            (u32::from(b0 & 0x1F) << 16)
                | (u32::from(rest[0]) << 8)
                | u32::from(rest[1])
        },
        0xE0..=0xEF => {
            let mut rest = [0u8; 3];
            read_exact(reader, &mut rest).await?;
            (u32::from(b0 & 0x0F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2])
        },
        0xF0 => {
            let mut rest = [0u8; 4];
            read_exact(reader, &mut rest).await?;
            u32::from_be_bytes(rest)
        },
        // 0xF1..=0xFF are reserved control bytes the device never sends.
        other => {
            return Err(CollectorError::wire(format!(
                "invalid length prefix byte 0x{other:02X}"
            )));
        },
    };

    if len > MAX_WORD_LEN {
        return Err(CollectorError::wire(format!(
            "word length {len} exceeds cap {MAX_WORD_LEN}"
        )));
    }
    Ok(len)
}

/// Reads one word. Invalid UTF-8 bytes are replaced, not fatal.
pub async fn read_word<R>(reader: &mut R) -> Result<String>
where R: AsyncRead + Unpin {
    let len = read_length(reader).await? as usize;
    if len == 0 {
        return Ok(String::new());
    }
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Reads words until the zero-length terminator and returns them in order.
pub async fn read_sentence<R>(reader: &mut R) -> Result<Vec<String>>
where R: AsyncRead + Unpin {
    let mut words = Vec::with_capacity(8);
    loop {
        let word = read_word(reader).await?;
        if word.is_empty() {
            return Ok(words);
        }
        words.push(word);
    }
}

async fn read_u8<R>(reader: &mut R) -> Result<u8>
where R: AsyncRead + Unpin {
    let mut b = [0u8; 1];
    read_exact(reader, &mut b).await?;
    Ok(b[0])
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where R: AsyncRead + Unpin {
    reader
        .read_exact(buf)
        .await
        .map_err(|e| CollectorError::wire(format!("short read: {e}")))?;
    Ok(())
}

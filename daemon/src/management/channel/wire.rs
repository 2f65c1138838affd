use super::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ChannelCommand {
    WriteCommand = 0x2,
    GetScreenBuffer = 0x3,
    GetScreenBufferSize = 0x4,
    SetScreenBufferSize = 0x5,
}

impl std::fmt::Display for ChannelCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Writes little-endian 32-bit words from the start of the region.
pub fn write_words(region: &mut [u8], words: &[i32]) -> Result<(), ChannelError> {
    let len = words.len() * 4;
    if len > region.len() {
        return Err(ChannelError::Overflow {
            len,
            capacity: region.len(),
        });
    }
    for (chunk, word) in region.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Ok(())
}

pub fn read_word(region: &[u8], index: usize) -> Result<i32, ChannelError> {
    let offset = index * 4;
    let bytes = region
        .get(offset..offset + 4)
        .ok_or(ChannelError::Overflow {
            len: offset + 4,
            capacity: region.len(),
        })?;
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    Ok(i32::from_le_bytes(word))
}

/// Command word followed by a 7-bit length prefixed UTF-8 string.
pub fn write_command_request(region: &mut [u8], text: &str) -> Result<(), ChannelError> {
    let data = text.as_bytes();
    let mut prefix = Vec::with_capacity(5);
    write_varint(&mut prefix, data.len() as u32);

    let len = 4 + prefix.len() + data.len();
    if len > region.len() {
        return Err(ChannelError::Overflow {
            len,
            capacity: region.len(),
        });
    }

    region[..4].copy_from_slice(&(ChannelCommand::WriteCommand as i32).to_le_bytes());
    region[4..4 + prefix.len()].copy_from_slice(&prefix);
    region[4 + prefix.len()..len].copy_from_slice(data);
    Ok(())
}

pub fn read_bool(region: &[u8]) -> bool {
    region.first().is_some_and(|b| *b != 0)
}

/// Screen text after the leading success byte, up to the first NUL.
pub fn read_screen_text(region: &[u8]) -> String {
    let body = region.get(1..).unwrap_or_default();
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

pub fn write_varint(buffer: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buffer.push((value as u8) | 0x80);
        value >>= 7;
    }
    buffer.push(value as u8);
}

pub fn read_varint(data: &[u8], offset: &mut usize) -> Result<u32, ChannelError> {
    let mut result = 0u32;
    let mut shift = 0;
    loop {
        let b = *data.get(*offset).ok_or(ChannelError::Overflow {
            len: *offset + 1,
            capacity: data.len(),
        })?;
        *offset += 1;
        result |= ((b & 0x7F) as u32) << shift;
        if (b & 0x80) == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 28 {
            return Err(ChannelError::Malformed("varint longer than 5 bytes"));
        }
    }
}

//! MPEG audio frame headers and leading ID3v2 tags.

/// Bytes in an MPEG audio frame header.
pub const HEADER_LEN: usize = 4;
/// Bytes in an ID3v2 tag header.
pub const ID3_HEADER_LEN: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    One,
    Two,
    Three,
}

/// Decoded fields of one frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub padding: bool,
    /// Total frame length in bytes, header included.
    pub frame_len: usize,
    /// PCM frames produced per channel.
    pub samples_per_frame: u32,
}

const BITRATES_V1_L1: [u32; 15] = [
    0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
const BITRATES_V1_L2: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
const BITRATES_V1_L3: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATES_V2_L1: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];
const BITRATES_V2_L23: [u32; 15] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

/// Parse the header at the start of `bytes`.
///
/// Returns `None` unless all four bytes form a valid header. Free-format frames are
/// rejected since their length cannot be derived from the header.
pub fn parse_header(bytes: &[u8]) -> Option<FrameHeader> {
    let b = bytes.get(..HEADER_LEN)?;
    if b[0] != 0xFF || b[1] & 0xE0 != 0xE0 {
        return None;
    }

    let version = match (b[1] >> 3) & 0x03 {
        0 => MpegVersion::Mpeg25,
        2 => MpegVersion::Mpeg2,
        3 => MpegVersion::Mpeg1,
        _ => return None,
    };
    let layer = match (b[1] >> 1) & 0x03 {
        1 => Layer::Three,
        2 => Layer::Two,
        3 => Layer::One,
        _ => return None,
    };

    let bitrate_index = (b[2] >> 4) as usize;
    if bitrate_index == 0 || bitrate_index == 15 {
        return None;
    }
    let table = match (version, layer) {
        (MpegVersion::Mpeg1, Layer::One) => &BITRATES_V1_L1,
        (MpegVersion::Mpeg1, Layer::Two) => &BITRATES_V1_L2,
        (MpegVersion::Mpeg1, Layer::Three) => &BITRATES_V1_L3,
        (_, Layer::One) => &BITRATES_V2_L1,
        _ => &BITRATES_V2_L23,
    };
    let bitrate_kbps = table[bitrate_index];

    let base_rate = match (b[2] >> 2) & 0x03 {
        0 => 44_100,
        1 => 48_000,
        2 => 32_000,
        _ => return None,
    };
    let sample_rate = match version {
        MpegVersion::Mpeg1 => base_rate,
        MpegVersion::Mpeg2 => base_rate / 2,
        MpegVersion::Mpeg25 => base_rate / 4,
    };

    // Emphasis value 2 is reserved.
    if b[3] & 0x03 == 0x02 {
        return None;
    }

    let padding = (b[2] >> 1) & 0x01 == 1;
    let channels = if b[3] >> 6 == 0x03 { 1 } else { 2 };
    let bits_per_second = bitrate_kbps * 1000;
    let pad = u32::from(padding);
    let (frame_len, samples_per_frame) = match (version, layer) {
        (_, Layer::One) => ((12 * bits_per_second / sample_rate + pad) * 4, 384),
        (_, Layer::Two) | (MpegVersion::Mpeg1, Layer::Three) => {
            (144 * bits_per_second / sample_rate + pad, 1152)
        }
        (_, Layer::Three) => (72 * bits_per_second / sample_rate + pad, 576),
    };

    Some(FrameHeader {
        version,
        layer,
        bitrate_kbps,
        sample_rate,
        channels,
        padding,
        frame_len: frame_len as usize,
        samples_per_frame,
    })
}

/// Offset of the first valid frame header in `window`.
pub fn find_frame_sync(window: &[u8]) -> Option<usize> {
    if window.len() < HEADER_LEN {
        return None;
    }
    (0..=window.len() - HEADER_LEN).find(|&i| window[i] == 0xFF && parse_header(&window[i..]).is_some())
}

/// Length of a trailing run that could be the start of a header cut off by the window end.
pub fn partial_header_len(window: &[u8]) -> usize {
    let start = window.len().saturating_sub(HEADER_LEN - 1);
    (start..window.len())
        .find(|&i| window[i] == 0xFF && window.get(i + 1).is_none_or(|b| b & 0xE0 == 0xE0))
        .map(|i| window.len() - i)
        .unwrap_or(0)
}

/// Total length of an ID3v2 tag at the start of `data`, header included.
///
/// The size field is a 28-bit synchsafe integer counting the bytes after the header.
pub fn id3_tag_len(data: &[u8]) -> Option<usize> {
    if data.len() < ID3_HEADER_LEN || &data[..3] != b"ID3" {
        return None;
    }
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
    Some(ID3_HEADER_LEN + size)
}

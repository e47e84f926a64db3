/// 8-bit XOR fold over `data`.
///
/// An empty slice folds to `0x00`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc ^ byte)
}

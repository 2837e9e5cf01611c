use crc::Crc;

/// CRC-CCITT as used by D-STAR: reflected polynomial 0x1021, seed 0xFFFF, complemented output.
///  This is the catalogue's X.25 / IBM-SDLC variant. The `crc` crate builds the 256-entry table at
///  compile time.
const CCITT: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

pub fn crc16_ccitt(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}

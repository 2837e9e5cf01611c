use crate::dv::crc::crc16_ccitt;

/// Wraps an APRS packet for transport in the D-STAR serial data channel (D-PRS). The receiving
///  gateway checks the CRC before passing the packet on to APRS-IS.
pub fn encode_aprs_string(aprs: &str) -> String {
    format!("$$CRC{:04X},{}", crc16_ccitt(aprs.as_bytes()), aprs)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_aprs_string() {
        let aprs = "KO6JXH-7>API52,DSTAR*:/200241z3239.44N/11657.83W[/J.P. HT ID-52PLUS\r";
        assert_eq!(encode_aprs_string(aprs), format!("$$CRC2DBE,{}", aprs));
    }
}

use std::fs;
use std::path::{Path, PathBuf};

/// DS18B20 reader over the kernel's 1-wire file interface. The file looks
/// like:
///
/// ```text
/// 6e 01 4b 46 7f ff 02 10 71 : crc=71 YES
/// 6e 01 4b 46 7f ff 02 10 71 t=22875
/// ```
///
/// The first line must end in `YES` (CRC good) before `t=` is trusted.
pub struct W1Temp {
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum W1Error {
    #[error("reading {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("sensor crc check failed")]
    BadCrc,
    #[error("malformed w1_slave contents")]
    Malformed,
}

impl W1Temp {
    pub fn new<P: AsRef<Path>>(path: P) -> Self { W1Temp { path: path.as_ref().to_path_buf() } }

    pub fn read_c(&self) -> Result<f32, W1Error> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| W1Error::Io(self.path.clone(), e))?;
        parse_w1(&raw)
    }
}

fn parse_w1(raw: &str) -> Result<f32, W1Error> {
    let mut lines = raw.lines();
    let crc_line = lines.next().ok_or(W1Error::Malformed)?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(W1Error::BadCrc);
    }
    let data_line = lines.next().ok_or(W1Error::Malformed)?;
    let t = data_line
        .rsplit("t=")
        .next()
        .ok_or(W1Error::Malformed)?
        .trim()
        .parse::<i32>()
        .map_err(|_| W1Error::Malformed)?;
    Ok(t as f32 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "6e 01 4b 46 7f ff 02 10 71 : crc=71 YES\n\
                        6e 01 4b 46 7f ff 02 10 71 t=22875\n";
    const BAD_CRC: &str = "6e 01 4b 46 7f ff 02 10 71 : crc=71 NO\n\
                           6e 01 4b 46 7f ff 02 10 71 t=22875\n";

    #[test]
    fn parses_millidegrees() {
        assert_eq!(parse_w1(GOOD).unwrap(), 22.875);
    }

    #[test]
    fn rejects_bad_crc() {
        assert!(matches!(parse_w1(BAD_CRC), Err(W1Error::BadCrc)));
    }

    #[test]
    fn negative_reading() {
        let raw = "xx : crc=aa YES\nxx t=-1250\n";
        assert_eq!(parse_w1(raw).unwrap(), -1.25);
    }
}

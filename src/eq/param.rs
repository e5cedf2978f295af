//! Equalizer parameters, usable without the equalizer itself

use std::fmt;
use std::path::Path;

use crate::error::EqError;

/// Number of equalizer bands; stored presets depend on it
pub const EQ_BANDS: usize = 18;

pub const EQ_BAND_MIN: f32 = -20.0;
pub const EQ_BAND_NULL: f32 = 0.0;
pub const EQ_BAND_MAX: f32 = 20.0;

/// Short band labels: Hz up to "880", kHz from "1.2" on
pub const BAND_NAMES: [&str; EQ_BANDS] = [
    "55", "77", "110", "156", "220", "311", "440", "622", "880", "1.2", "1.8", "2.5", "3.5", "5",
    "7", "10", "14", "20",
];

/// Layouts of common 10-band equalizers that can be mapped to our bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Typical10Band {
    /// 60, 170, 310, 600, 1k, 3k, 6k, 12k, 14k, 16k Hz
    Winamp2,
    /// 31, 62, 125, 250, 500, 1k, 2k, 4k, 8k, 16k Hz
    Sj2,
}

/// Band gains in dB, each within [`EQ_BAND_MIN`, `EQ_BAND_MAX`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EqParam {
    pub bands: [f32; EQ_BANDS],
}

impl EqParam {
    /// All bands at 0 dB
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bands(bands: [f32; EQ_BANDS]) -> Self {
        let mut param = Self { bands };
        param.clamp();
        param
    }

    pub fn is_flat(&self) -> bool {
        self.bands.iter().all(|&db| db == EQ_BAND_NULL)
    }

    fn clamp(&mut self) {
        for db in self.bands.iter_mut() {
            *db = if db.is_finite() {
                db.clamp(EQ_BAND_MIN, EQ_BAND_MAX)
            } else {
                EQ_BAND_NULL
            };
        }
    }

    /// Format as `"<db><sep>"` per band with one decimal, dropping `.0`.
    ///
    /// A flat parameter with `;` reads `0;0;0;...;0;`.
    pub fn to_string_with(&self, sep: &str) -> String {
        let mut ret = String::with_capacity(EQ_BANDS * 6);
        for db in &self.bands {
            let value = format!("{:.1}", db);
            ret.push_str(value.strip_suffix(".0").unwrap_or(&value));
            ret.push_str(sep);
        }
        ret
    }

    /// Parse a list of band values.
    ///
    /// Bands are separated by `;` or new lines; spaces are ignored. Missing
    /// or unparsable values become 0 dB, extra values are dropped, and
    /// everything is clamped to the band range.
    pub fn from_string(s: &str) -> Self {
        let cleaned: String = s
            .chars()
            .filter(|&c| c != ' ' && c != '\r')
            .map(|c| if c == '\n' { ';' } else { c })
            .collect();

        let mut bands = [EQ_BAND_NULL; EQ_BANDS];
        for (band, value) in bands.iter_mut().zip(cleaned.split(';')) {
            *band = value.parse::<f32>().unwrap_or(EQ_BAND_NULL);
        }

        Self::from_bands(bands)
    }

    /// Add `db` to every band, clamping the result
    pub fn shift(&mut self, db: f32) {
        for band in self.bands.iter_mut() {
            *band += db;
        }
        self.clamp();
    }

    /// Offset that moves every band to 0 dB or below.
    ///
    /// If all bands are already below 0 dB, the returned offset moves them up
    /// as far as possible instead.
    pub fn auto_level_shift(&self) -> f32 {
        let mut max_above = 0.0f32;
        let mut min_below: Option<f32> = None;

        for &db in &self.bands {
            if db > max_above {
                max_above = db;
            } else if db < 0.0 {
                let cut = -db;
                min_below = Some(min_below.map_or(cut, |m| m.min(cut)));
            }
        }

        if max_above > 0.0 {
            return -max_above;
        }

        match min_below {
            Some(up) if self.bands.iter().all(|&db| db + up <= 0.0) => up,
            _ => 0.0,
        }
    }

    /// Spread the values of a 10-band equalizer over our 18 bands
    pub fn from_typical_10_band(bands: &[f32; 10], layout: Typical10Band) -> Self {
        // target band ranges for each of the 10 source bands
        let spans: [(usize, usize); 10] = match layout {
            Typical10Band::Winamp2 => [
                (0, 2),
                (2, 5),
                (5, 7),
                (7, 9),
                (9, 11),
                (11, 13),
                (13, 15),
                (15, 16),
                (16, 17),
                (17, 18),
            ],
            Typical10Band::Sj2 => [
                (0, 1),
                (1, 2),
                (2, 3),
                (3, 6),
                (6, 8),
                (8, 10),
                (10, 12),
                (12, 14),
                (14, 16),
                (16, 18),
            ],
        };

        let mut out = [EQ_BAND_NULL; EQ_BANDS];
        for (&value, &(from, to)) in bands.iter().zip(spans.iter()) {
            out[from..to].fill(value);
        }
        Self::from_bands(out)
    }

    /// Import a parameter file, chosen by extension.
    ///
    /// - `.fx-eq`: old ini format, keys `eq.gain0` .. `eq.gain9`
    /// - `.eqf`: Winamp equalizer library
    /// - `.eq`: Shibatch SuperEQ preset
    /// - anything else: our own text format
    pub fn from_file(path: &Path) -> Result<Self, EqError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let param = match ext.as_str() {
            "fx-eq" => Self::from_fx_eq(&read_latin1(path)?),
            "eqf" => Self::from_winamp_eqf(&std::fs::read(path)?)
                .ok_or_else(|| EqError::UnrecognizedFile(path.display().to_string()))?,
            "eq" => Self::from_supereq(&read_latin1(path)?),
            _ => Self::from_string(&read_latin1(path)?),
        };

        if param.auto_level_shift() < 0.0 {
            tracing::debug!("Imported equalizer bands above 0 dB may distort");
        }

        Ok(param)
    }

    fn from_fx_eq(content: &str) -> Self {
        let mut bands = [0.0f32; 10];
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Some(index) = key.trim().strip_prefix("eq.gain") else {
                continue;
            };
            if let Ok(b) = index.parse::<usize>() {
                if b < bands.len() {
                    bands[b] = value.trim().parse().unwrap_or(0.0);
                }
            }
        }
        Self::from_typical_10_band(&bands, Typical10Band::Sj2)
    }

    /// Winamp stores 0 = +12 dB, 31 = 0 dB, 63 = -12 dB at offset 288
    fn from_winamp_eqf(content: &[u8]) -> Option<Self> {
        if content.len() < 298 || !content.starts_with(b"Wi") {
            return None;
        }
        let mut bands = [0.0f32; 10];
        for (b, band) in bands.iter_mut().enumerate() {
            *band = (f32::from(content[288 + b] as i8) - 31.0) * -0.375;
        }
        Some(Self::from_typical_10_band(&bands, Typical10Band::Sj2))
    }

    /// `lpreamp lband1 .. lband18 rpreamp ...`, all values are cuts without sign
    fn from_supereq(content: &str) -> Self {
        let bands = content.split_once(' ').map_or("", |(_, rest)| rest);
        let mut param = Self::from_string(&bands.replace(' ', ";"));
        for db in param.bands.iter_mut() {
            *db = -*db;
        }
        param
    }
}

impl fmt::Display for EqParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(";"))
    }
}

/// Equalizer files are plain ASCII written on Windows; map bytes 1:1
fn read_latin1(path: &Path) -> Result<String, EqError> {
    let bytes = std::fs::read(path)?;
    Ok(bytes.iter().map(|&b| char::from(b)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_to_string_shortens_zero_decimals() {
        let mut param = EqParam::new();
        param.bands[0] = 3.0;
        param.bands[1] = -2.5;
        let s = param.to_string_with(";");
        assert!(s.starts_with("3;-2.5;0;0;"));
        assert!(s.ends_with(";"));
        assert_eq!(s.matches(';').count(), EQ_BANDS);
        assert_eq!(param.to_string(), s);
    }

    #[test]
    fn test_from_string_cleans_and_clamps() {
        let param = EqParam::from_string(" 1.5;\r\n-30 ; 25;abc;4");
        assert_eq!(param.bands[0], 1.5);
        assert_eq!(param.bands[1], 0.0); // empty between \n-mapped ';' and ';'
        assert_eq!(param.bands[2], -20.0);
        assert_eq!(param.bands[3], 20.0);
        assert_eq!(param.bands[4], 0.0);
        assert_eq!(param.bands[5], 4.0);
        assert_eq!(param.bands[17], 0.0);
    }

    #[test]
    fn test_string_format_reparses() {
        let mut param = EqParam::new();
        param.bands[3] = 7.5;
        param.bands[17] = -12.0;
        assert_eq!(EqParam::from_string(&param.to_string_with("\n")), param);
    }

    #[test]
    fn test_shift_clamps() {
        let mut param = EqParam::new();
        param.bands[0] = 15.0;
        param.shift(10.0);
        assert_eq!(param.bands[0], EQ_BAND_MAX);
        assert_eq!(param.bands[1], 10.0);
    }

    #[test]
    fn test_auto_level_shift() {
        let mut param = EqParam::new();
        param.bands[4] = 6.0;
        assert_eq!(param.auto_level_shift(), -6.0);

        let param = EqParam::from_bands([-4.0; EQ_BANDS]);
        assert_eq!(param.auto_level_shift(), 4.0);

        let mut param = EqParam::from_bands([-4.0; EQ_BANDS]);
        param.bands[2] = 0.0;
        assert_eq!(param.auto_level_shift(), 0.0);
    }

    #[test]
    fn test_typical_10_band_mappings() {
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];

        let winamp = EqParam::from_typical_10_band(&src, Typical10Band::Winamp2);
        assert_eq!(&winamp.bands[0..5], &[1.0, 1.0, 2.0, 2.0, 2.0]);
        assert_eq!(&winamp.bands[15..], &[8.0, 9.0, 10.0]);

        let sj2 = EqParam::from_typical_10_band(&src, Typical10Band::Sj2);
        assert_eq!(&sj2.bands[0..6], &[1.0, 2.0, 3.0, 4.0, 4.0, 4.0]);
        assert_eq!(&sj2.bands[16..], &[10.0, 10.0]);
    }

    #[test]
    fn test_from_file_formats() {
        let dir = tempfile::tempdir().unwrap();

        let native = dir.path().join("preset.feq");
        std::fs::write(&native, "1\n2\n3\n").unwrap();
        let param = EqParam::from_file(&native).unwrap();
        assert_eq!(&param.bands[..4], &[1.0, 2.0, 3.0, 0.0]);

        let supereq = dir.path().join("preset.eq");
        std::fs::write(&supereq, "99 3 4 5").unwrap();
        let param = EqParam::from_file(&supereq).unwrap();
        assert_eq!(&param.bands[..4], &[-3.0, -4.0, -5.0, 0.0]);

        let fx = dir.path().join("old.fx-eq");
        std::fs::write(&fx, "[eq]\neq.gain0=2.5\neq.gain9 = -1\n").unwrap();
        let param = EqParam::from_file(&fx).unwrap();
        assert_eq!(param.bands[0], 2.5);
        assert_eq!(param.bands[17], -1.0);

        let eqf = dir.path().join("winamp.eqf");
        let mut bytes = b"Winamp EQ library file v1.1".to_vec();
        bytes.resize(299, 31);
        bytes[288] = 0; // +11.625 dB
        let mut file = std::fs::File::create(&eqf).unwrap();
        file.write_all(&bytes).unwrap();
        let param = EqParam::from_file(&eqf).unwrap();
        assert_eq!(param.bands[0], 11.625);
        assert_eq!(param.bands[5], 0.0);

        let bogus = dir.path().join("bogus.eqf");
        std::fs::write(&bogus, "nope").unwrap();
        assert!(matches!(EqParam::from_file(&bogus), Err(EqError::UnrecognizedFile(_))));
    }
}

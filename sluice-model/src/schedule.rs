use chrono::{DateTime, Datelike, TimeZone, Timelike};

use crate::error::{ModelError, Result};

/// Number of fifteen-minute quarters in a week.
pub const QUARTERS_PER_WEEK: usize = 7 * 24 * 4;

const WORDS: usize = QUARTERS_PER_WEEK.div_ceil(64);

/// Weekly processing schedule: one bit per quarter hour, Sunday 00:00 first.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Schedule {
    bits: [u64; WORDS],
}

impl Default for Schedule {
    fn default() -> Self {
        Self::always()
    }
}

impl Schedule {
    pub fn always() -> Self {
        let mut schedule = Self { bits: [0; WORDS] };
        for quarter in 0..QUARTERS_PER_WEEK {
            schedule.set(quarter, true);
        }
        schedule
    }

    pub fn never() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Parse the 672-character `'0'`/`'1'` wire form. An empty string means
    /// "always on".
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::always());
        }
        if raw.len() != QUARTERS_PER_WEEK {
            return Err(ModelError::InvalidSchedule(format!(
                "expected {QUARTERS_PER_WEEK} quarters, got {}",
                raw.len()
            )));
        }

        let mut schedule = Self::never();
        for (quarter, ch) in raw.chars().enumerate() {
            match ch {
                '1' => schedule.set(quarter, true),
                '0' => {}
                other => {
                    return Err(ModelError::InvalidSchedule(format!(
                        "unexpected character `{other}` at quarter {quarter}"
                    )));
                }
            }
        }
        Ok(schedule)
    }

    pub fn set(&mut self, quarter: usize, active: bool) {
        if quarter >= QUARTERS_PER_WEEK {
            return;
        }
        let mask = 1u64 << (quarter % 64);
        if active {
            self.bits[quarter / 64] |= mask;
        } else {
            self.bits[quarter / 64] &= !mask;
        }
    }

    pub fn is_active(&self, quarter: usize) -> bool {
        quarter < QUARTERS_PER_WEEK
            && self.bits[quarter / 64] & (1u64 << (quarter % 64)) != 0
    }

    /// Whether processing is allowed at `at`, evaluated in `at`'s own zone.
    pub fn is_active_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.is_active(quarter_of(at))
    }

    pub fn is_always(&self) -> bool {
        *self == Self::always()
    }

    pub fn to_wire(&self) -> String {
        (0..QUARTERS_PER_WEEK)
            .map(|quarter| if self.is_active(quarter) { '1' } else { '0' })
            .collect()
    }
}

/// Quarter index of `at` within its week, Sunday 00:00 = 0.
pub fn quarter_of<Tz: TimeZone>(at: &DateTime<Tz>) -> usize {
    let day = at.weekday().num_days_from_sunday() as usize;
    let hour = at.hour() as usize;
    let quarter_in_hour = (at.minute() / 15) as usize;
    (day * 24 + hour) * 4 + quarter_in_hour
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = (0..QUARTERS_PER_WEEK)
            .filter(|quarter| self.is_active(*quarter))
            .count();
        f.debug_struct("Schedule")
            .field("active_quarters", &active)
            .finish()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Schedule {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Schedule {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        Schedule::parse(&raw).map_err(serde::de::Error::custom)
    }
}

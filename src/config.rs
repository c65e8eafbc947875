use crate::error::Error;

/// Parameter table revision reported by `sys-info`. A different major revision in the NV image
/// loads defaults, a different minor revision keeps the stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Revision {
    pub major: u16,
    pub minor: u16,
}

impl Revision {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// `major << 16 | minor` as stored in the `sys-info` cell.
    pub const fn to_word(self) -> i32 {
        ((self.major as u32) << 16 | self.minor as u32) as i32
    }

    pub const fn from_word(word: i32) -> Self {
        Self {
            major: (word as u32 >> 16) as u16,
            minor: word as u16,
        }
    }
}

/// Values written to `sys-key` to unlock access levels 1 to 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccessSecrets {
    pub user: u32,
    pub service: u32,
    pub production: u32,
    pub developer: u32,
}

impl AccessSecrets {
    pub const fn new(user: u32, service: u32, production: u32, developer: u32) -> Self {
        Self {
            user,
            service,
            production,
            developer,
        }
    }

    /// Secrets ordered by the level they unlock, level 1 first.
    pub const fn by_level(&self) -> [u32; 4] {
        [self.user, self.service, self.production, self.developer]
    }

    /// Access level unlocked by `key`, 0 if it matches no secret.
    pub fn level_of(&self, key: u32) -> u8 {
        self.by_level()
            .iter()
            .position(|&secret| secret == key)
            .map_or(0, |position| position as u8 + 1)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        let secrets = self.by_level();
        for (i, secret) in secrets.iter().enumerate() {
            if secrets[i + 1..].contains(secret) {
                return Err(Error::ParameterKeyCollision);
            }
        }
        Ok(())
    }
}

impl Default for AccessSecrets {
    fn default() -> Self {
        Self::new(1, 2, 3, 4)
    }
}

/// Load-time settings of a [`crate::Registry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub secrets: AccessSecrets,
}

impl Config {
    pub const fn new(secrets: AccessSecrets) -> Self {
        Self { secrets }
    }
}

// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;
use std::str::FromStr;

/// 128-bit identifier split into two signed halves, printed in UUID layout.
///
/// Parallel-replicas group identities use this type: every remote source that reads
/// a replica of the same distributed query carries the same id.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct UniqueId {
    pub hi: i64,
    pub lo: i64,
}

fn write_uuid(f: &mut fmt::Formatter<'_>, hi: i64, lo: i64) -> fmt::Result {
    let hi = hi as u64;
    let lo = lo as u64;
    write!(
        f,
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (hi >> 32) as u32,
        (hi >> 16) as u16,
        hi as u16,
        (lo >> 48) as u16,
        lo & 0x0000_FFFF_FFFF_FFFF
    )
}

pub fn format_uuid(hi: i64, lo: i64) -> String {
    UniqueId { hi, lo }.to_string()
}

impl UniqueId {
    pub const NIL: UniqueId = UniqueId { hi: 0, lo: 0 };

    pub const fn new(hi: i64, lo: i64) -> Self {
        Self { hi, lo }
    }

    pub const fn from_u128(value: u128) -> Self {
        Self {
            hi: (value >> 64) as u64 as i64,
            lo: value as u64 as i64,
        }
    }

    pub const fn as_u128(self) -> u128 {
        ((self.hi as u64 as u128) << 64) | (self.lo as u64 as u128)
    }

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    pub fn to_uuid_string(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_uuid(f, self.hi, self.lo)
    }
}

impl FromStr for UniqueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let groups: Vec<&str> = trimmed.split('-').collect();
        let widths = [8usize, 4, 4, 4, 12];
        if groups.len() != widths.len()
            || groups.iter().zip(widths).any(|(g, w)| g.len() != w)
        {
            return Err(format!("invalid uuid string '{}'", s));
        }
        let hex = groups.concat();
        let value = u128::from_str_radix(&hex, 16)
            .map_err(|e| format!("invalid uuid string '{}': {}", s, e))?;
        Ok(Self::from_u128(value))
    }
}

#[cfg(test)]
mod tests {
    use super::{UniqueId, format_uuid};

    #[test]
    fn format_uuid_matches_java_uuid_layout() {
        assert_eq!(
            format_uuid(116135542886790518, -7531368976812794106),
            "019c98a9-3390-7576-977b-33d188ad1f06"
        );
    }

    #[test]
    fn unique_id_display_uses_uuid() {
        let id = UniqueId { hi: 0, lo: 1 };
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000001");
    }

    #[test]
    fn parse_accepts_display_output() {
        let id = UniqueId::new(116135542886790518, -7531368976812794106);
        let parsed: UniqueId = id.to_string().parse().expect("parse uuid");
        assert_eq!(parsed, id);
        assert_eq!(UniqueId::from_u128(id.as_u128()), id);
    }

    #[test]
    fn parse_rejects_malformed_groups() {
        assert!("019c98a9-3390-7576-977b".parse::<UniqueId>().is_err());
        assert!("019c98a9-3390-7576-977b-33d188ad1fzz".parse::<UniqueId>().is_err());
        assert!(UniqueId::default().is_nil());
    }
}

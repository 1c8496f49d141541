// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preferences-file loader (spec §6): `KEY=VALUE` lines, keys
//! case-insensitive, unknown keys ignored, malformed values fall back to
//! compile-time defaults.

/// Poll-delay ladder: the adaptive back-off the unit task advances through
/// on idleness and resets on activity (spec §4.11 step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub unit_task_priority: u32,
    pub unit_stack_size: u32,
    pub use_dma: bool,
    pub use_miami_workaround: bool,
    pub tx_pending_fast_ticks: u32,
    pub tx_reclaim_soft_us: u32,
    pub rx_poll_burst: u32,
    pub rx_poll_burst_idle_break: u32,
    pub poll_delay_us: Vec<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unit_task_priority: 4,
            unit_stack_size: 1024,
            use_dma: true,
            use_miami_workaround: false,
            tx_pending_fast_ticks: 4,
            tx_reclaim_soft_us: 500,
            rx_poll_burst: 16,
            rx_poll_burst_idle_break: 4,
            poll_delay_us: vec![50, 200, 1000, 5000],
        }
    }
}

impl Config {
    /// Parses a preferences file's contents. Unknown keys are ignored;
    /// malformed values for a known key leave that field at its default
    /// rather than failing the whole parse.
    pub fn parse(contents: &str) -> Self {
        let mut config = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();
            match key.as_str() {
                "UNIT_TASK_PRIORITY" => set_u32(&mut config.unit_task_priority, value),
                "UNIT_STACK_SIZE" => set_u32(&mut config.unit_stack_size, value),
                "USE_DMA" => set_bool(&mut config.use_dma, value),
                "USE_MIAMI_WORKAROUND" => set_bool(&mut config.use_miami_workaround, value),
                "TX_PENDING_FAST_TICKS" => set_u32(&mut config.tx_pending_fast_ticks, value),
                "TX_RECLAIM_SOFT_US" => set_u32(&mut config.tx_reclaim_soft_us, value),
                "RX_POLL_BURST" => set_u32(&mut config.rx_poll_burst, value),
                "RX_POLL_BURST_IDLE_BREAK" => {
                    set_u32(&mut config.rx_poll_burst_idle_break, value)
                }
                "POLL_DELAY_US" => {
                    if let Some(list) = parse_delay_list(value) {
                        config.poll_delay_us = list;
                    }
                }
                _ => {
                    log::debug!("ignoring unknown preferences key {key}");
                }
            }
        }
        config
    }
}

fn set_u32(field: &mut u32, value: &str) {
    if let Ok(v) = value.parse() {
        *field = v;
    }
}

fn set_bool(field: &mut bool, value: &str) {
    match value {
        "0" => *field = false,
        "1" => *field = true,
        _ => {}
    }
}

fn parse_delay_list(value: &str) -> Option<Vec<u32>> {
    let parsed: Result<Vec<u32>, _> = value.split(',').map(|v| v.trim().parse()).collect();
    match parsed {
        Ok(list) if !list.is_empty() => Some(list),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::parse("NOT_A_REAL_KEY=123\n");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_value_falls_back_to_default() {
        let config = Config::parse("USE_DMA=maybe\n");
        assert_eq!(config.use_dma, Config::default().use_dma);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let config = Config::parse("use_dma=0\n");
        assert!(!config.use_dma);
    }

    #[test]
    fn parses_poll_delay_ladder() {
        let config = Config::parse("POLL_DELAY_US=10,20,30\n");
        assert_eq!(config.poll_delay_us, vec![10, 20, 30]);
    }
}

//! Per-slot inspector port allocation.

use crate::constants::{DEBUG_BRK_FLAG, DEBUG_FLAG};
use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugMode {
    #[default]
    None,
    Debug,
    DebugBreak,
}

impl DebugMode {
    pub fn is_enabled(self) -> bool {
        self != DebugMode::None
    }

    fn flag_name(self) -> Option<&'static str> {
        match self {
            DebugMode::None => None,
            DebugMode::Debug => Some(DEBUG_FLAG),
            DebugMode::DebugBreak => Some(DEBUG_BRK_FLAG),
        }
    }
}

/// Port for `slot_index`, or `None` when `base_port + slot_index` leaves the port range.
pub fn port_for(slot_index: usize, base_port: u16) -> Option<u16> {
    u16::try_from(slot_index)
        .ok()
        .and_then(|offset| base_port.checked_add(offset))
}

/// The single flag appended to a slot's worker arguments, if any.
pub fn debug_flag(mode: DebugMode, slot_index: usize, base_port: u16) -> Result<Option<String>> {
    let Some(name) = mode.flag_name() else {
        return Ok(None);
    };
    let port = port_for(slot_index, base_port).ok_or_else(|| {
        PoolError::ConfigurationError(format!(
            "debug port for slot {slot_index} exceeds {} (base {base_port})",
            u16::MAX
        ))
    })?;
    Ok(Some(format!("{name}={port}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_slot_two_uses_5860() {
        assert_eq!(port_for(2, 5858), Some(5860));
        assert_eq!(
            debug_flag(DebugMode::Debug, 2, 5858).unwrap().as_deref(),
            Some("--debug=5860")
        );
    }

    #[test]
    fn test_break_mode_flag() {
        assert_eq!(
            debug_flag(DebugMode::DebugBreak, 0, 9229).unwrap().as_deref(),
            Some("--debug-brk=9229")
        );
    }

    #[test]
    fn test_no_flag_without_mode() {
        assert_eq!(debug_flag(DebugMode::None, 3, 5858).unwrap(), None);
        assert_eq!(debug_flag(DebugMode::None, usize::MAX, u16::MAX).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_ports_are_not_clamped() {
        assert_eq!(port_for(65_536, 5858), None);
        assert_eq!(port_for(1, u16::MAX), None);
        assert_eq!(port_for(0, u16::MAX), Some(u16::MAX));
        assert!(matches!(
            debug_flag(DebugMode::Debug, 65_536, 5858),
            Err(PoolError::ConfigurationError(_))
        ));
    }

    proptest! {
        #[test]
        fn port_is_base_plus_index(base in 1024u16..60000, index in 0usize..512) {
            prop_assert_eq!(port_for(index, base).map(usize::from), Some(base as usize + index));
        }
    }
}

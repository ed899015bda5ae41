//! ArduCopter flight-mode table.
//!
//! The CopterSonde is an ArduCopter airframe, so only the copter mode map
//! is carried. Unknown custom modes render as `MODE(n)` rather than
//! failing, since the autopilot firmware may be newer than this table.

const COPTER_MODES: &[(u32, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (21, "SMART_RTL"),
];

pub fn mode_name(custom_mode: u32) -> String {
    for &(num, name) in COPTER_MODES {
        if num == custom_mode {
            return name.to_string();
        }
    }
    format!("MODE({custom_mode})")
}

pub fn mode_number(name: &str) -> Option<u32> {
    let upper = name.to_uppercase();
    COPTER_MODES
        .iter()
        .find(|&&(_, mode)| mode == upper)
        .map(|&(num, _)| num)
}

pub fn available_modes() -> Vec<&'static str> {
    COPTER_MODES.iter().map(|&(_, name)| name).collect()
}

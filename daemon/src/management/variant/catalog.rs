use gsm_protocol::management::instance::ConsoleMode;

use super::SteamGameEntry;

const SOURCE_MODS: &[&str] = &["SourceMod"];

pub static CATALOG: [SteamGameEntry; 7] = [
    SteamGameEntry {
        class_name: "AOC",
        display_name: "Age of Chivalry Dedicated Server",
        app_id: "17515",
        game: "ageofchivalry",
        start_path: "srcds.exe",
        start_parameter:
            "-console -game ageofchivalry +ip 0.0.0.0 -port 27015 +maxplayers 32 +map aoc_siege",
        console_mode: ConsoleMode::Windowed,
        stop_command: Some("quit"),
        query_port: Some(27015),
        backup_entries: &[
            "ageofchivalry/addons",
            "ageofchivalry/cfg",
            "ageofchivalry/maps",
        ],
        mods: SOURCE_MODS,
    },
    SteamGameEntry {
        class_name: "BGT",
        display_name: "Bloody Good Time Dedicated Server",
        app_id: "2460",
        game: "",
        start_path: "srcds.exe",
        start_parameter: "",
        console_mode: ConsoleMode::Windowed,
        stop_command: Some("quit"),
        query_port: Some(27015),
        backup_entries: &[],
        mods: SOURCE_MODS,
    },
    SteamGameEntry {
        class_name: "Contagion",
        display_name: "Contagion Dedicated Server",
        app_id: "293030",
        game: "contagion",
        start_path: "srcds.exe",
        start_parameter:
            "-console -game contagion -ip 0.0.0.0 -port 27015 -maxplayers 8 +map ch_cypruspark",
        console_mode: ConsoleMode::Windowed,
        stop_command: Some("quit"),
        query_port: Some(27015),
        backup_entries: &[],
        mods: SOURCE_MODS,
    },
    SteamGameEntry {
        class_name: "DayZ",
        display_name: "DayZ Dedicated Server",
        app_id: "223350",
        game: "",
        start_path: "DayZServer_x64.exe",
        start_parameter:
            "-config=serverDZ.cfg -port=2302 -profiles=profiles -doLogs -adminLog -netLog",
        console_mode: ConsoleMode::Redirect,
        stop_command: None,
        query_port: None,
        backup_entries: &[],
        mods: &[],
    },
    SteamGameEntry {
        class_name: "Mordhau",
        display_name: "MORDHAU Dedicated Server",
        app_id: "629800",
        game: "",
        start_path: "Mordhau/Binaries/Win64/MordhauServer-Win64-Shipping.exe",
        start_parameter: "FFA_ThePit -Port=7777 -QueryPort=27015 -BeaconPort=15000 -log",
        console_mode: ConsoleMode::Redirect,
        stop_command: None,
        query_port: Some(27015),
        backup_entries: &["Mordhau/Saved"],
        mods: &[],
    },
    SteamGameEntry {
        class_name: "Subsistence",
        display_name: "Subsistence Dedicated Server",
        app_id: "1362640",
        game: "",
        start_path: "Binaries/Win64/UDK.exe",
        start_parameter: "server coldmap1?steamsockets -log",
        console_mode: ConsoleMode::Redirect,
        stop_command: None,
        query_port: Some(27015),
        backup_entries: &["UDKGame"],
        mods: &[],
    },
    SteamGameEntry {
        class_name: "HLDS",
        display_name: "Half-Life Dedicated Server",
        app_id: "90",
        game: "cstrike",
        start_path: "hlds.exe",
        start_parameter: "-console -game cstrike +ip 0.0.0.0 -port 27015 +maxplayers 32 +map de_dust2",
        console_mode: ConsoleMode::SharedMemory,
        stop_command: Some("quit"),
        query_port: Some(27015),
        backup_entries: &["cstrike/cfg", "cstrike/maps"],
        mods: &[],
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn class_names_are_unique() {
        let names: HashSet<_> = CATALOG.iter().map(|entry| entry.class_name).collect();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn every_game_has_an_app_id() {
        assert!(CATALOG
            .iter()
            .all(|entry| entry.app_id.parse::<u32>().is_ok()));
    }
}

//! Default configuration file contents.
//!
//! Config files live inside an instance's data volume under
//! `Config/WindowsServer/`. Provisioning writes these defaults once;
//! reconciliation re-creates a missing file but never overwrites one the
//! tenant has edited. INI validation is out of scope here, inputs are
//! trusted by the time they reach the engine.

use crate::instance::ServerInstance;

/// Relative directory (under the save mount) holding the INI files.
pub const CONFIG_SUBDIR: &str = "Config/WindowsServer";

pub const GAME_USER_SETTINGS_FILE: &str = "GameUserSettings.ini";
pub const GAME_INI_FILE: &str = "Game.ini";

/// Relative path of a config file under the save mount.
pub fn config_file_path(file_name: &str) -> String {
    format!("{}/{}", CONFIG_SUBDIR, file_name)
}

/// Default `GameUserSettings.ini` seeded from the instance record.
pub fn default_game_user_settings(instance: &ServerInstance) -> String {
    format!(
        "[ServerSettings]\n\
         SessionName={session}\n\
         ServerPassword=\n\
         ServerAdminPassword={password}\n\
         Port={port}\n\
         QueryPort={query}\n\
         RCONEnabled=True\n\
         RCONPort={rcon}\n\
         MaxPlayers={max_players}\n\
         \n\
         [SessionSettings]\n\
         SessionName={session}\n\
         \n\
         [MessageOfTheDay]\n\
         Message=Welcome to {session}!\n\
         \n\
         [/Script/ShooterGame.ShooterGameMode]\n\
         bUseSingleplayerSettings=False\n\
         bDisableStructurePlacementCollision=False\n\
         bAllowFlyerCarryPvE=True\n\
         bDisableStructureDecayPvE=False\n\
         \n\
         [RCONSettings]\n\
         RCONEnabled=True\n\
         RCONPort={rcon}\n",
        session = instance.session_name,
        password = instance.admin_password,
        port = instance.port,
        query = instance.query_port,
        rcon = instance.rcon_port,
        max_players = instance.max_players,
    )
}

/// Default `Game.ini` with stock 1.0 multipliers.
pub fn default_game_ini() -> String {
    "[/script/shootergame.shootergamemode]\n\
     bUseSingleplayerSettings=false\n\
     bDisableStructurePlacementCollision=false\n\
     bAllowFlyerCarryPvE=true\n\
     bDisableStructureDecayPvE=false\n\
     bAllowUnlimitedRespecs=true\n\
     bAllowPlatformSaddleMultiFloors=true\n\
     bPassiveDefensesDamageRiderlessDinos=true\n\
     MaxNumberOfPlayersInTribe=0\n\
     \n\
     [/script/engine.gamesession]\n\
     MaxPlayers=70\n\
     \n\
     [/Script/ShooterGame.ShooterGameMode]\n\
     DifficultyOffset=1.0\n\
     OverrideOfficialDifficulty=5.0\n\
     ResourcesRespawnPeriodMultiplier=1.0\n\
     TamingSpeedMultiplier=1.0\n\
     DinoCharacterFoodDrainMultiplier=1.0\n\
     DinoCharacterStaminaDrainMultiplier=1.0\n\
     DinoCharacterHealthRecoveryMultiplier=1.0\n\
     DinoCountMultiplier=1.0\n\
     XPMultiplier=1.0\n\
     PlayerCharacterWaterDrainMultiplier=1.0\n\
     PlayerCharacterFoodDrainMultiplier=1.0\n\
     PlayerCharacterStaminaDrainMultiplier=1.0\n\
     PlayerCharacterHealthRecoveryMultiplier=1.0\n\
     HarvestAmountMultiplier=1.0\n\
     HarvestHealthMultiplier=1.0\n\
     DayCycleSpeedScale=1.0\n\
     NightTimeSpeedScale=1.0\n\
     StructureResistanceMultiplier=1.0\n\
     StructureDamageMultiplier=1.0\n\
     StructureDamageRepairCooldown=180\n\
     PvEStructureDecayPeriodMultiplier=1.0\n\
     bPvEDisableFriendlyFire=False\n\
     bEnablePvPGamma=False\n\
     bDisableFriendlyFire=False\n"
        .to_string()
}

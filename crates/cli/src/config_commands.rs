use {
    anyhow::Result,
    switchyard::Switchyard,
    switchyard_config::{Section, SettingsExt, SwitchyardConfig},
};

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// One line per declared entry: its name and what it points at.
fn describe(config: &SwitchyardConfig, section: Section) -> Vec<String> {
    config
        .names(section)
        .into_iter()
        .map(|name| {
            let detail = match section {
                Section::Connectors => config
                    .config_for_connector(&name)
                    .ok()
                    .and_then(|c| c.str_value("type").map(|t| format!("type={t}")))
                    .unwrap_or_else(|| "type=?".into()),
                Section::Senders | Section::Receivers => {
                    let cfg = match section {
                        Section::Senders => config.config_for_sender(&name),
                        _ => config.config_for_receiver(&name),
                    };
                    cfg.ok()
                        .and_then(|c| c.str_value("connector").map(|t| format!("connector={t}")))
                        .unwrap_or_else(|| "connector=?".into())
                },
            };
            format!("{name} ({detail})")
        })
        .collect()
}

pub fn check(yard: &Switchyard) -> Result<()> {
    let config = yard.config()?;
    let registry = yard.registry();
    let mut unknown = 0;

    for section in [Section::Connectors, Section::Senders, Section::Receivers] {
        let lines = describe(&config, section);
        println!("{BOLD}{}{RESET} ({})", section.key(), lines.len());
        for line in lines {
            println!("  {line}");
        }
    }

    for name in config.names(Section::Connectors) {
        let ty = config
            .config_for_connector(&name)
            .ok()
            .and_then(|c| c.str_value("type").map(str::to_string))
            .unwrap_or_else(|| name.clone());
        if !registry.contains(&ty) {
            eprintln!("warning: no connector plugin for [{ty}] (connector [{name}])");
            unknown += 1;
        }
    }

    if unknown > 0 {
        anyhow::bail!("{unknown} connector(s) without a registered plugin");
    }
    println!("configuration ok");
    Ok(())
}

// src/services/color.rs
//! Hex colours and catalog codes to descriptive phrases for prompts.

const PALETTE: &[(&str, (u8, u8, u8))] = &[
    ("brilliant colorless", (0xFF, 0xFF, 0xFF)),
    ("icy white", (0xF0, 0xF8, 0xFF)),
    ("warm yellow gold", (0xFF, 0xD7, 0x00)),
    ("rich yellow gold", (0xD4, 0xAF, 0x37)),
    ("soft rose gold", (0xB7, 0x6E, 0x79)),
    ("blush pink", (0xF4, 0xC2, 0xC2)),
    ("bright silver", (0xC0, 0xC0, 0xC0)),
    ("cool platinum", (0xE5, 0xE4, 0xE2)),
    ("deep royal blue", (0x0F, 0x52, 0xBA)),
    ("light sky blue", (0x87, 0xCE, 0xEB)),
    ("vivid emerald green", (0x50, 0xC8, 0x78)),
    ("deep forest green", (0x22, 0x8B, 0x22)),
    ("pigeon-blood red", (0xE0, 0x11, 0x5F)),
    ("deep crimson", (0x9B, 0x11, 0x1E)),
    ("royal purple", (0x9B, 0x59, 0xB6)),
    ("soft lavender", (0xE6, 0xE6, 0xFA)),
    ("golden yellow", (0xFF, 0xC8, 0x7C)),
    ("fiery orange", (0xFF, 0x8C, 0x00)),
    ("champagne", (0xF7, 0xE7, 0xCE)),
    ("smoky brown", (0x6F, 0x4E, 0x37)),
    ("jet black", (0x00, 0x00, 0x00)),
    ("ocean teal", (0x00, 0x80, 0x80)),
];

pub fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.trim().trim_start_matches('#');
    let expanded = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => digits.to_string(),
        _ => return None,
    };
    let value = u32::from_str_radix(&expanded, 16).ok()?;
    Some(((value >> 16) as u8, (value >> 8) as u8, value as u8))
}

/// Nearest palette phrase for a hex colour; `None` for unparseable input.
pub fn describe_hex(hex: &str) -> Option<&'static str> {
    let (r, g, b) = parse_hex(hex)?;
    PALETTE
        .iter()
        .min_by_key(|(_, (pr, pg, pb))| {
            let dr = r as i32 - *pr as i32;
            let dg = g as i32 - *pg as i32;
            let db = b as i32 - *pb as i32;
            dr * dr + dg * dg + db * db
        })
        .map(|(name, _)| *name)
}

/// Catalog stone code to a natural-language stone name.
pub fn stone_name_for_code(code: &str) -> Option<&'static str> {
    let name = match code.trim().to_ascii_uppercase().as_str() {
        "DIA" | "DIAMOND" => "diamond",
        "LGD" => "lab-grown diamond",
        "SAP" | "SAPPHIRE" => "sapphire",
        "RUB" | "RUBY" => "ruby",
        "EME" | "EMERALD" => "emerald",
        "AME" | "AMETHYST" => "amethyst",
        "TOP" | "TOPAZ" => "topaz",
        "AQU" | "AQUAMARINE" => "aquamarine",
        "MOR" | "MORGANITE" => "morganite",
        "MOI" | "MOISSANITE" => "moissanite",
        "PRL" | "PEARL" => "pearl",
        "OPL" | "OPAL" => "opal",
        "GAR" | "GARNET" => "garnet",
        "CIT" | "CITRINE" => "citrine",
        "TAN" | "TANZANITE" => "tanzanite",
        _ => return None,
    };
    Some(name)
}

/// Human karat wording for a purity marking, e.g. "750" or "18K" -> "18k".
fn karat_phrase(purity: &str) -> Option<String> {
    let normalized = purity.trim().to_ascii_uppercase();
    if let Some(karat) = normalized.strip_suffix('K').or_else(|| normalized.strip_suffix("KT")) {
        return karat.parse::<u8>().ok().map(|k| format!("{}k", k));
    }
    match normalized.as_str() {
        "375" => Some("9k".to_string()),
        "585" => Some("14k".to_string()),
        "750" => Some("18k".to_string()),
        "916" => Some("22k".to_string()),
        "999" => Some("24k".to_string()),
        _ => None,
    }
}

/// Describes a metal from its catalog family, purity and colour,
/// e.g. ("gold", "18K", "#B76E79") -> "18k soft rose gold".
pub fn metal_phrase(metal_type: &str, purity: Option<&str>, color_hex: Option<&str>) -> String {
    let metal = metal_type.trim().to_lowercase();
    let shade = color_hex.and_then(describe_hex);

    if metal.contains("gold") {
        let karat = purity.and_then(karat_phrase);
        let tone = match shade {
            Some(s) if s.contains("rose") || s.contains("pink") => "rose gold",
            Some(s) if s.contains("silver") || s.contains("platinum") || s.contains("white") => {
                "white gold"
            }
            _ if metal.contains("rose") => "rose gold",
            _ if metal.contains("white") => "white gold",
            _ => "yellow gold",
        };
        return match karat {
            Some(k) => format!("{} {}", k, tone),
            None => tone.to_string(),
        };
    }

    if metal.contains("silver") {
        return match purity.map(str::trim) {
            Some("925") => "sterling silver".to_string(),
            _ => "polished silver".to_string(),
        };
    }

    if metal.contains("platinum") {
        return "polished platinum".to_string();
    }

    if metal.is_empty() {
        "precious metal".to_string()
    } else {
        metal
    }
}

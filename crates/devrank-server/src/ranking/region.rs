//! Free-text location to region normalization
//!
//! Each region compiles to one case-insensitive, word-bounded alternation of
//! its name and aliases. When several regions match, the one mentioned last
//! in the text wins ("London, Ontario, Canada" is Canada); equal positions
//! fall back to gazetteer order.

use regex::Regex;

use crate::config::RegionEntry;

struct Region {
    name: String,
    pattern: Regex,
}

pub struct RegionGazetteer {
    regions: Vec<Region>,
}

const DEFAULT_REGIONS: &[(&str, &[&str])] = &[
    ("United States", &["usa", "united states", "u.s.a", "san francisco", "new york", "nyc", "seattle", "boston", "chicago", "los angeles", "austin", "silicon valley", "california", "texas", "washington dc"]),
    ("Canada", &["toronto", "vancouver", "montreal", "ottawa", "ontario", "quebec", "british columbia"]),
    ("United Kingdom", &["uk", "united kingdom", "england", "scotland", "wales", "london", "manchester", "edinburgh", "cambridge", "oxford"]),
    ("Germany", &["deutschland", "berlin", "munich", "münchen", "hamburg", "frankfurt", "cologne", "köln", "stuttgart"]),
    ("France", &["paris", "lyon", "toulouse", "marseille"]),
    ("Netherlands", &["holland", "the netherlands", "amsterdam", "rotterdam", "utrecht", "delft"]),
    ("Spain", &["españa", "madrid", "barcelona", "valencia"]),
    ("Italy", &["italia", "rome", "roma", "milan", "milano", "turin", "torino"]),
    ("Poland", &["polska", "warsaw", "warszawa", "krakow", "kraków", "wroclaw", "wrocław"]),
    ("Sweden", &["sverige", "stockholm", "gothenburg", "göteborg"]),
    ("Switzerland", &["schweiz", "suisse", "zurich", "zürich", "geneva", "genève", "bern"]),
    ("Ukraine", &["kyiv", "kiev", "kharkiv", "lviv", "odesa"]),
    ("Russia", &["russian federation", "moscow", "saint petersburg", "st. petersburg"]),
    ("India", &["bangalore", "bengaluru", "mumbai", "delhi", "new delhi", "hyderabad", "pune", "chennai", "kolkata"]),
    ("China", &["beijing", "shanghai", "shenzhen", "hangzhou", "guangzhou"]),
    ("Japan", &["tokyo", "osaka", "kyoto"]),
    ("South Korea", &["korea", "republic of korea", "seoul", "busan"]),
    ("Indonesia", &["jakarta", "bandung", "surabaya"]),
    ("Australia", &["sydney", "melbourne", "brisbane", "perth"]),
    ("Brazil", &["brasil", "são paulo", "sao paulo", "rio de janeiro", "belo horizonte"]),
    ("Argentina", &["buenos aires", "córdoba", "rosario"]),
    ("Mexico", &["méxico", "mexico city", "guadalajara", "monterrey"]),
    ("Nigeria", &["lagos", "abuja"]),
    ("Turkey", &["türkiye", "turkiye", "istanbul", "ankara"]),
];

fn compile(name: &str, aliases: &[String]) -> Result<Regex, regex::Error> {
    let alternation = std::iter::once(name.to_lowercase())
        .chain(aliases.iter().map(|a| a.to_lowercase()))
        .filter(|a| !a.trim().is_empty())
        .map(|a| regex::escape(a.trim()))
        .collect::<Vec<_>>()
        .join("|");

    // Aliases may end in punctuation ("u.s.a"), where `\b` never matches
    Regex::new(&format!(r"(?i)(?:^|[^\w])(?:{alternation})(?:$|[^\w])"))
}

impl RegionGazetteer {
    pub fn new(entries: &[RegionEntry]) -> Result<Self, regex::Error> {
        let regions = entries
            .iter()
            .map(|entry| {
                Ok(Region {
                    name: entry.name.clone(),
                    pattern: compile(&entry.name, &entry.aliases)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { regions })
    }

    /// Configured regions, or the built-in list when none are configured
    pub fn from_config(entries: &[RegionEntry]) -> Result<Self, regex::Error> {
        if entries.is_empty() {
            Self::new(&default_regions())
        } else {
            Self::new(entries)
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Region name for a free-text location, `None` when nothing matches
    pub fn normalize(&self, location: Option<&str>) -> Option<String> {
        let text = location?.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }

        let mut best: Option<(usize, &Region)> = None;
        for region in &self.regions {
            let Some(end) = region.pattern.find_iter(&text).map(|m| m.end()).max() else {
                continue;
            };
            if best.map_or(true, |(best_end, _)| end > best_end) {
                best = Some((end, region));
            }
        }

        best.map(|(_, region)| region.name.clone())
    }

    /// Canonical spelling of a region name given in any case
    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.regions
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name.trim()))
            .map(|r| r.name.as_str())
    }
}

pub fn default_regions() -> Vec<RegionEntry> {
    DEFAULT_REGIONS
        .iter()
        .map(|(name, aliases)| RegionEntry {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        })
        .collect()
}

//! Overall rankings page: ranked programs with nested sub-programs.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::{element_text, meta_description, PageFields};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRanking {
    pub category: String,
    pub rank: u32,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_programs: Vec<ProgramRanking>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallRankingsRecord {
    pub page_title: Option<String>,
    pub meta_description: Option<String>,
    pub rankings: Vec<ProgramRanking>,
    /// Label/value metrics shown next to the rankings.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn rank_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#(\d{1,4})").expect("rank regex is valid"))
}

fn category_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bin\s+(.+?)(?:\s*\(tie\))?\s*$").expect("category regex is valid")
    })
}

/// `"#13 in Computer Science (tie)"` to `("Computer Science", 13)`.
pub(crate) fn parse_badge(text: &str) -> Option<(String, u32)> {
    let rank = rank_pattern().captures(text)?[1].parse().ok()?;
    let category = category_pattern().captures(text)?[1].trim().to_string();
    if category.is_empty() {
        return None;
    }
    Some((category, rank))
}

fn first_link(item: &ElementRef<'_>, links: &Selector) -> Option<(String, String)> {
    item.select(links).find_map(|a| {
        let href = a.value().attr("href")?;
        Some((href.to_string(), element_text(&a)))
    })
}

pub(crate) fn parse(document: &Html) -> OverallRankingsRecord {
    let mut record = OverallRankingsRecord {
        page_title: Selector::parse("title").ok().and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|t| element_text(&t))
                .filter(|t| !t.is_empty())
        }),
        meta_description: meta_description(document),
        rankings: Vec::new(),
        fields: PageFields::extract(document).values,
    };

    let (Ok(lists), Ok(items), Ok(links)) = (
        Selector::parse(r#"ul[class*="BadgeList"]"#),
        Selector::parse(r#"li[class*="BadgeList__ListItem"]"#),
        Selector::parse("a[href]"),
    ) else {
        return record;
    };

    let Some(main_list) = document.select(&lists).next() else {
        return record;
    };

    let sub_program = |item: &ElementRef<'_>| -> Vec<ProgramRanking> {
        item.select(&lists)
            .flat_map(|nested| nested.select(&items))
            .filter_map(|sub| {
                let (href, text) = first_link(&sub, &links)?;
                let (category, rank) = parse_badge(&text)?;
                Some(ProgramRanking {
                    category,
                    rank,
                    url: href,
                    sub_programs: Vec::new(),
                })
            })
            .collect()
    };

    let nested_urls: HashSet<String> = main_list
        .select(&items)
        .flat_map(|item| sub_program(&item))
        .map(|p| p.url)
        .collect();

    let mut seen = HashSet::new();
    for item in main_list.select(&items) {
        let Some((href, text)) = first_link(&item, &links) else {
            continue;
        };
        if nested_urls.contains(&href) || seen.contains(&href) || !href.contains("rankings") {
            continue;
        }
        let Some((category, rank)) = parse_badge(&text) else {
            continue;
        };
        seen.insert(href.clone());
        record.rankings.push(ProgramRanking {
            category,
            rank,
            url: href,
            sub_programs: sub_program(&item),
        });
    }

    record
}

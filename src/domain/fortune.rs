use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

pub const LUCK_MIN: i64 = 0;
pub const LUCK_MAX: i64 = 100;

/// Omen tiers, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Omen {
    GreatLuck,
    SmallLuck,
    Luck,
    EndLuck,
    Ill,
    GreatIll,
}

impl Omen {
    pub const ALL: [Omen; 6] = [
        Omen::GreatLuck,
        Omen::SmallLuck,
        Omen::Luck,
        Omen::EndLuck,
        Omen::Ill,
        Omen::GreatIll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Omen::GreatLuck => "大吉",
            Omen::SmallLuck => "小吉",
            Omen::Luck => "吉",
            Omen::EndLuck => "末吉",
            Omen::Ill => "凶",
            Omen::GreatIll => "大凶",
        }
    }
}

impl fmt::Display for Omen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Omen {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Omen::ALL.iter().copied().find(|o| o.as_str() == s).ok_or(())
    }
}

pub const COLORS: &[&str] = &[
    "红色", "蓝色", "绿色", "紫色", "白色", "黑色", "灰色",
    "粉色", "金色", "黄色", "橙色", "青色", "银色", "棕色",
];

pub const ADVICE_DO: &[&str] = &[
    "出门逛街", "加班学习", "打扫卫生", "看书充电", "给喜欢的人表白", "搞副业",
];

pub const ADVICE_DONT: &[&str] = &[
    "熬夜", "和人吵架", "冲动消费", "吃太多甜食", "迟到", "赖床",
];

/// One freshly drawn fortune, before it is bound to a user and date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fortune {
    pub luck_value: i64,
    pub omen: Omen,
    pub color: &'static str,
    pub advice_do: &'static str,
    pub advice_dont: &'static str,
}

/// Hands out a fresh seed for every draw.
pub trait SeedSource: Send + Sync {
    fn next_seed(&self) -> u64;
}

/// Seeds from the thread-local OS-seeded generator; no two calls repeat.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropySeed;

impl SeedSource for EntropySeed {
    fn next_seed(&self) -> u64 {
        rand::thread_rng().gen()
    }
}

/// Same seed every time, for reproducible tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSeed(pub u64);

impl SeedSource for FixedSeed {
    fn next_seed(&self) -> u64 {
        self.0
    }
}

pub fn rng_from(seeds: &dyn SeedSource) -> StdRng {
    StdRng::seed_from_u64(seeds.next_seed())
}

/// Draws every field uniformly and independently.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Fortune {
    Fortune {
        luck_value: rng.gen_range(LUCK_MIN..=LUCK_MAX),
        omen: *Omen::ALL.choose(rng).unwrap_or(&Omen::Luck),
        color: pick(COLORS, rng),
        advice_do: pick(ADVICE_DO, rng),
        advice_dont: pick(ADVICE_DONT, rng),
    }
}

fn pick<R: Rng + ?Sized>(items: &'static [&'static str], rng: &mut R) -> &'static str {
    items.choose(rng).copied().unwrap_or_default()
}

pub fn clamp_luck(value: i64) -> i64 {
    value.clamp(LUCK_MIN, LUCK_MAX)
}

//! Deterministic synthetic ledgers for load and performance testing.
//!
//! The output is a plain Beancount-style file: header comments, options,
//! commodity and account declarations, an opening balance, then a stream of
//! purchase and paycheck transactions. Given the same [`GeneratorConfig`]
//! the bytes are identical across runs and platforms.

#![forbid(unsafe_code)]

use std::fmt::Write as _;

use clap::ValueEnum;
use ptaconf_reference::Date;

/// Default seed when none is given.
pub const DEFAULT_SEED: u64 = 42;

const ASSETS: &[&str] = &[
    "Assets:Bank:Checking",
    "Assets:Bank:Savings",
    "Assets:Cash",
    "Assets:Investment:Brokerage",
    "Assets:Investment:401k",
    "Assets:Investment:IRA",
    "Assets:Receivables",
];

const LIABILITIES: &[&str] = &[
    "Liabilities:CreditCard:Visa",
    "Liabilities:CreditCard:Amex",
    "Liabilities:Mortgage",
    "Liabilities:StudentLoan",
];

const INCOME: &[&str] = &[
    "Income:Salary",
    "Income:Bonus",
    "Income:Interest",
    "Income:Dividends",
    "Income:Freelance",
];

const EXPENSES: &[&str] = &[
    "Expenses:Food:Groceries",
    "Expenses:Food:Restaurants",
    "Expenses:Food:Coffee",
    "Expenses:Transport:Gas",
    "Expenses:Transport:PublicTransit",
    "Expenses:Transport:Parking",
    "Expenses:Housing:Rent",
    "Expenses:Housing:Utilities:Electric",
    "Expenses:Housing:Utilities:Gas",
    "Expenses:Housing:Utilities:Water",
    "Expenses:Housing:Utilities:Internet",
    "Expenses:Shopping:Clothing",
    "Expenses:Shopping:Electronics",
    "Expenses:Shopping:Home",
    "Expenses:Health:Insurance",
    "Expenses:Health:Medical",
    "Expenses:Health:Pharmacy",
    "Expenses:Entertainment:Movies",
    "Expenses:Entertainment:Games",
    "Expenses:Entertainment:Subscriptions",
    "Expenses:Travel:Flights",
    "Expenses:Travel:Hotels",
    "Expenses:Travel:CarRental",
    "Expenses:Education:Books",
    "Expenses:Education:Courses",
    "Expenses:Taxes:Federal",
    "Expenses:Taxes:State",
    "Expenses:Taxes:Property",
];

const EQUITY: &[&str] = &["Equity:OpeningBalances", "Equity:Adjustments"];

const ACCOUNT_TEMPLATES: &[&[&str]] = &[ASSETS, LIABILITIES, INCOME, EXPENSES, EQUITY];

/// Expense keyword to payee names; first keyword contained in the account wins.
const PAYEES: &[(&str, &[&str])] = &[
    (
        "Groceries",
        &["Whole Foods", "Trader Joe's", "Safeway", "Costco", "Walmart"],
    ),
    (
        "Restaurants",
        &["Chipotle", "Olive Garden", "Local Cafe", "Pizza Hut", "Thai Place"],
    ),
    (
        "Coffee",
        &["Starbucks", "Blue Bottle", "Philz Coffee", "Local Roaster"],
    ),
    ("Gas", &["Shell", "Chevron", "Costco Gas", "BP", "Exxon"]),
    (
        "Clothing",
        &["Target", "Nordstrom", "Amazon", "Old Navy", "Gap"],
    ),
    (
        "Electronics",
        &["Best Buy", "Amazon", "Apple Store", "Newegg"],
    ),
];

const DEFAULT_PAYEES: &[&str] = &["Generic Vendor", "Local Store", "Online Purchase"];

const COMMODITIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "AAPL", "GOOG", "MSFT", "AMZN", "TSLA",
    "META", "NVDA", "VTI", "VOO", "BND",
];

/// Transactions draw their commodity from this many leading pool entries.
const MAIN_CURRENCIES: usize = 3;

const FLAGS: &[char] = &['*', '*', '*', '!'];

/// Transaction complexity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Purchase amount bounds in cents, inclusive.
    const fn amount_cents(self) -> (u64, u64) {
        match self {
            Self::Low => (500, 10_000),
            Self::Medium => (1_000, 50_000),
            Self::High => (100, 1_000_000),
        }
    }
}

/// Named scale presets setting transactions, accounts and commodities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    Small,
    Medium,
    Large,
    Huge,
}

impl Preset {
    /// `(transactions, accounts, commodities)`.
    #[must_use]
    pub const fn counts(self) -> (usize, usize, usize) {
        match self {
            Self::Small => (100, 20, 3),
            Self::Medium => (10_000, 100, 5),
            Self::Large => (100_000, 200, 10),
            Self::Huge => (1_000_000, 500, 20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub transactions: usize,
    pub accounts: usize,
    pub commodities: usize,
    pub start_date: Date,
    pub complexity: Complexity,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            transactions: 10_000,
            accounts: 100,
            commodities: 5,
            start_date: Date {
                year: 2020,
                month: 1,
                day: 1,
            },
            complexity: Complexity::Medium,
            seed: DEFAULT_SEED,
        }
    }
}

impl GeneratorConfig {
    #[must_use]
    pub fn with_preset(mut self, preset: Preset) -> Self {
        let (transactions, accounts, commodities) = preset.counts();
        self.transactions = transactions;
        self.accounts = accounts;
        self.commodities = commodities;
        self
    }
}

/// splitmix64 step, used to expand a seed into generator state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// xorshift64* stream. Never reaches the all-zero state.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut expand = seed;
        let state = splitmix64(&mut expand);
        Self {
            state: if state == 0 {
                0x9E37_79B9_7F4A_7C15
            } else {
                state
            },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in `[0, 1)` with 53 bits of precision.
    pub fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.unit() < probability
    }

    /// Uniform in `[low, high]`.
    pub fn between(&mut self, low: u64, high: u64) -> u64 {
        low + self.next_u64() % (high - low + 1)
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = (self.next_u64() % items.len() as u64) as usize;
        items.get(idx)
    }
}

/// The account pool: every template, then random `:Sub<n>` children, cut to
/// `count`.
pub fn account_pool(count: usize, rng: &mut Rng) -> Vec<String> {
    let mut accounts: Vec<String> = ACCOUNT_TEMPLATES
        .iter()
        .flat_map(|group| group.iter().map(|a| (*a).to_string()))
        .collect();
    while accounts.len() < count {
        let group = rng.pick(ACCOUNT_TEMPLATES).copied().unwrap_or(ASSETS);
        let base = rng.pick(group).copied().unwrap_or("Assets:Cash");
        let child = format!("{base}:Sub{}", accounts.len());
        accounts.push(child);
    }
    accounts.truncate(count);
    accounts
}

/// The first `count` commodities, capped at the pool size.
#[must_use]
pub fn commodity_pool(count: usize) -> &'static [&'static str] {
    &COMMODITIES[..count.min(COMMODITIES.len())]
}

fn payee_for(account: &str, rng: &mut Rng) -> &'static str {
    let names = PAYEES
        .iter()
        .find(|(key, _)| account.contains(key))
        .map_or(DEFAULT_PAYEES, |(_, names)| *names);
    rng.pick(names).copied().unwrap_or("Generic Vendor")
}

fn cents(value: u64) -> String {
    format!("{}.{:02}", value / 100, value % 100)
}

struct Pools<'a> {
    assets: Vec<&'a str>,
    expenses: Vec<&'a str>,
    income: Vec<&'a str>,
    currencies: &'static [&'static str],
}

impl<'a> Pools<'a> {
    fn new(accounts: &'a [String], commodities: &'static [&'static str]) -> Self {
        let with_root = |root: &str| -> Vec<&'a str> {
            accounts
                .iter()
                .map(String::as_str)
                .filter(|a| a.starts_with(root))
                .collect()
        };
        let mut assets = with_root("Assets:");
        let mut expenses = with_root("Expenses:");
        if assets.is_empty() || expenses.is_empty() {
            assets = vec!["Assets:Checking"];
            expenses = vec!["Expenses:Misc"];
        }
        let currencies = if commodities.is_empty() {
            &COMMODITIES[..1]
        } else {
            &commodities[..commodities.len().min(MAIN_CURRENCIES)]
        };
        Self {
            assets,
            expenses,
            income: with_root("Income:"),
            currencies,
        }
    }
}

fn purchase(
    out: &mut String,
    date: Date,
    pools: &Pools<'_>,
    complexity: Complexity,
    rng: &mut Rng,
) {
    let expense = rng.pick(&pools.expenses).copied().unwrap_or("Expenses:Misc");
    let asset = rng.pick(&pools.assets).copied().unwrap_or("Assets:Checking");
    let payee = payee_for(expense, rng);
    let commodity = rng.pick(pools.currencies).copied().unwrap_or("USD");
    let (low, high) = complexity.amount_cents();
    let amount = rng.between(low, high);
    let flag = rng.pick(FLAGS).copied().unwrap_or('*');

    let _ = writeln!(out, "{date} {flag} \"{payee}\" \"Purchase at {payee}\"");
    if complexity == Complexity::High && rng.chance(0.3) {
        let leaf = expense.rsplit(':').next().unwrap_or(expense);
        let _ = writeln!(out, "  category: \"{}\"", leaf.to_lowercase());
    }
    let _ = writeln!(out, "  {expense}  {} {commodity}", cents(amount));
    let _ = writeln!(out, "  {asset}");
}

fn paycheck(out: &mut String, date: Date, pools: &Pools<'_>, rng: &mut Rng) {
    let income = rng.pick(&pools.income).copied().unwrap_or("Income:Salary");
    let asset = rng.pick(&pools.assets).copied().unwrap_or("Assets:Checking");
    let commodity = rng.pick(pools.currencies).copied().unwrap_or("USD");
    let amount = rng.between(200_000, 800_000);

    let _ = writeln!(out, "{date} * \"Employer\" \"Paycheck\"");
    let _ = writeln!(out, "  {asset}  {} {commodity}", cents(amount));
    let _ = writeln!(out, "  {income}");
}

/// Render a complete ledger for `config`.
#[must_use]
pub fn generate(config: &GeneratorConfig) -> String {
    let mut rng = Rng::new(config.seed);
    let mut out = String::with_capacity(config.transactions.saturating_mul(110) + 4096);

    let _ = writeln!(
        out,
        "; Benchmark file generated with {} transactions",
        config.transactions
    );
    let _ = writeln!(
        out,
        "; Accounts: {}, Commodities: {}",
        config.accounts, config.commodities
    );
    let _ = writeln!(out, "; Complexity: {}", config.complexity.as_str());
    out.push('\n');
    out.push_str("option \"title\" \"Benchmark Ledger\"\n");
    out.push_str("option \"operating_currency\" \"USD\"\n");
    out.push('\n');

    let accounts = account_pool(config.accounts, &mut rng);
    let commodities = commodity_pool(config.commodities);

    for commodity in commodities {
        let _ = writeln!(out, "1900-01-01 commodity {commodity}");
    }
    out.push('\n');

    let open_date = config.start_date.add_days(-1);
    for account in &accounts {
        let _ = writeln!(out, "{open_date} open {account}");
    }
    out.push('\n');

    let _ = writeln!(out, "{open_date} * \"Opening Balance\"");
    out.push_str("  Assets:Bank:Checking  10000.00 USD\n");
    out.push_str("  Equity:OpeningBalances\n");
    out.push('\n');

    let pools = Pools::new(&accounts, commodities);
    let mut date = config.start_date;
    for i in 0..config.transactions {
        if rng.chance(0.3) {
            date = date.add_days(rng.between(1, 3) as i64);
        }
        if i % 30 == 0 {
            paycheck(&mut out, date, &pools, &mut rng);
        } else {
            purchase(&mut out, date, &pools, config.complexity, &mut rng);
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptaconf_reference::scan_source;
    use ptaconf_reference::validate::validate_directives;

    fn small(seed: u64) -> GeneratorConfig {
        GeneratorConfig {
            seed,
            ..GeneratorConfig::default().with_preset(Preset::Small)
        }
    }

    #[test]
    fn same_seed_same_bytes() {
        assert_eq!(generate(&small(7)), generate(&small(7)));
    }

    #[test]
    fn different_seeds_differ() {
        assert_ne!(generate(&small(1)), generate(&small(2)));
    }

    #[test]
    fn zero_seed_produces_a_live_stream() {
        let mut rng = Rng::new(0);
        let first = rng.next_u64();
        let second = rng.next_u64();
        assert_ne!(first, 0);
        assert_ne!(first, second);
        assert!(!generate(&small(0)).is_empty());
    }

    #[test]
    fn between_stays_in_bounds() {
        let mut rng = Rng::new(99);
        for _ in 0..10_000 {
            let v = rng.between(1, 3);
            assert!((1..=3).contains(&v));
        }
        assert!((0..1000).all(|_| (0.0..1.0).contains(&rng.unit())));
    }

    #[test]
    fn account_pool_keeps_templates_then_extends() {
        let mut rng = Rng::new(DEFAULT_SEED);
        let pool = account_pool(60, &mut rng);
        assert_eq!(pool.len(), 60);
        assert_eq!(pool[0], "Assets:Bank:Checking");
        assert_eq!(pool[45], "Equity:Adjustments");
        assert!(pool[46].ends_with(":Sub46"));
        assert!(pool[59].ends_with(":Sub59"));

        let short = account_pool(20, &mut rng);
        assert_eq!(short.len(), 20);
        assert_eq!(short[19], "Expenses:Transport:Gas");
    }

    #[test]
    fn commodity_pool_is_capped() {
        assert_eq!(commodity_pool(3), ["USD", "EUR", "GBP"]);
        assert_eq!(commodity_pool(100).len(), COMMODITIES.len());
        assert!(commodity_pool(0).is_empty());
    }

    #[test]
    fn small_preset_shape() {
        let text = generate(&small(DEFAULT_SEED));
        assert!(text.starts_with("; Benchmark file generated with 100 transactions\n"));
        assert!(text.contains("; Accounts: 20, Commodities: 3\n"));
        assert_eq!(text.lines().filter(|l| l.contains(" open ")).count(), 20);
        assert_eq!(text.lines().filter(|l| l.contains(" commodity ")).count(), 3);
        assert!(text.contains("2019-12-31 open Assets:Bank:Checking\n"));
        assert_eq!(text.matches("\"Employer\" \"Paycheck\"").count(), 4);
        let headers = text
            .lines()
            .filter(|l| l.starts_with(|c: char| c.is_ascii_digit()))
            .filter(|l| l.contains(" * \"") || l.contains(" ! \""))
            .count();
        assert_eq!(headers, 101);
    }

    #[test]
    fn paychecks_land_on_every_thirtieth_entry() {
        let text = generate(&small(3));
        let body = text
            .split("  Equity:OpeningBalances\n\n")
            .nth(1)
            .unwrap_or_default();
        let entries: Vec<&str> = body.split("\n\n").filter(|e| !e.is_empty()).collect();
        assert_eq!(entries.len(), 100);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.contains("\"Paycheck\""), i % 30 == 0, "entry {i}");
        }
    }

    #[test]
    fn high_complexity_adds_category_metadata() {
        let config = GeneratorConfig {
            transactions: 300,
            complexity: Complexity::High,
            ..GeneratorConfig::default()
        };
        let text = generate(&config);
        assert!(text.contains("  category: \""));
        let low = GeneratorConfig {
            complexity: Complexity::Low,
            ..config
        };
        assert!(!generate(&low).contains("category:"));
    }

    #[test]
    fn generated_ledger_scans_and_validates_cleanly() {
        let config = GeneratorConfig {
            transactions: 500,
            complexity: Complexity::High,
            ..GeneratorConfig::default()
        };
        let ledger = scan_source(&generate(&config));
        assert!(!ledger.has_parse_errors(), "{:?}", ledger.diagnostics);
        assert_eq!(ledger.directive_count(), 5 + 100 + 1 + 500);
        let findings = validate_directives(&ledger.directives);
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn start_date_moves_opens() {
        let config = GeneratorConfig {
            transactions: 1,
            start_date: Date::parse("2024-03-01").unwrap(),
            ..GeneratorConfig::default()
        };
        let text = generate(&config);
        assert!(text.contains("2024-02-29 open Assets:Cash\n"));
        assert!(text.contains("2024-02-29 * \"Opening Balance\"\n"));
    }
}

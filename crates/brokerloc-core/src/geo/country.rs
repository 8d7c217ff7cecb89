//! Country name to ISO 3166-1 alpha-2 code.

/// Countries the site publishes broker listings for.
const COUNTRY_CODES: &[(&str, &str)] = &[
    ("United States", "US"),
    ("United Kingdom", "GB"),
    ("Canada", "CA"),
    ("Australia", "AU"),
    ("Germany", "DE"),
    ("France", "FR"),
    ("Japan", "JP"),
    ("China", "CN"),
    ("India", "IN"),
    ("Brazil", "BR"),
    ("Russia", "RU"),
    ("South Africa", "ZA"),
    ("Mexico", "MX"),
    ("Italy", "IT"),
    ("Spain", "ES"),
    ("Netherlands", "NL"),
    ("Switzerland", "CH"),
    ("Sweden", "SE"),
    ("Norway", "NO"),
    ("Denmark", "DK"),
    ("Finland", "FI"),
    ("Belgium", "BE"),
    ("Austria", "AT"),
    ("Poland", "PL"),
    ("Czech Republic", "CZ"),
    ("Hungary", "HU"),
    ("Portugal", "PT"),
    ("Greece", "GR"),
    ("Turkey", "TR"),
    ("Israel", "IL"),
    ("South Korea", "KR"),
    ("Singapore", "SG"),
    ("Hong Kong", "HK"),
    ("Taiwan", "TW"),
    ("Thailand", "TH"),
    ("Malaysia", "MY"),
    ("Indonesia", "ID"),
    ("Philippines", "PH"),
    ("Vietnam", "VN"),
    ("New Zealand", "NZ"),
    ("Argentina", "AR"),
    ("Chile", "CL"),
    ("Colombia", "CO"),
    ("Peru", "PE"),
    ("Venezuela", "VE"),
    ("Ecuador", "EC"),
    ("Uruguay", "UY"),
    ("Paraguay", "PY"),
    ("Bolivia", "BO"),
    ("Egypt", "EG"),
    ("Nigeria", "NG"),
    ("Kenya", "KE"),
    ("Morocco", "MA"),
    ("Ghana", "GH"),
    ("Ethiopia", "ET"),
    ("Uganda", "UG"),
    ("Tanzania", "TZ"),
    ("Zimbabwe", "ZW"),
    ("Zambia", "ZM"),
    ("Botswana", "BW"),
    ("Namibia", "NA"),
    ("Mozambique", "MZ"),
    ("Madagascar", "MG"),
    ("Mauritius", "MU"),
    ("Seychelles", "SC"),
    ("United Arab Emirates", "AE"),
    ("Saudi Arabia", "SA"),
    ("Qatar", "QA"),
    ("Kuwait", "KW"),
    ("Bahrain", "BH"),
    ("Oman", "OM"),
    ("Jordan", "JO"),
    ("Lebanon", "LB"),
    ("Cyprus", "CY"),
    ("Malta", "MT"),
    ("Luxembourg", "LU"),
    ("Iceland", "IS"),
    ("Ireland", "IE"),
    ("Estonia", "EE"),
    ("Latvia", "LV"),
    ("Lithuania", "LT"),
    ("Slovenia", "SI"),
    ("Slovakia", "SK"),
    ("Croatia", "HR"),
    ("Serbia", "RS"),
    ("Montenegro", "ME"),
    ("Bosnia and Herzegovina", "BA"),
    ("North Macedonia", "MK"),
    ("Albania", "AL"),
    ("Bulgaria", "BG"),
    ("Romania", "RO"),
    ("Moldova", "MD"),
    ("Ukraine", "UA"),
    ("Belarus", "BY"),
    ("Georgia", "GE"),
    ("Armenia", "AM"),
    ("Azerbaijan", "AZ"),
    ("Kazakhstan", "KZ"),
    ("Uzbekistan", "UZ"),
    ("Kyrgyzstan", "KG"),
    ("Tajikistan", "TJ"),
    ("Turkmenistan", "TM"),
    ("Afghanistan", "AF"),
    ("Pakistan", "PK"),
    ("Bangladesh", "BD"),
    ("Sri Lanka", "LK"),
    ("Nepal", "NP"),
    ("Bhutan", "BT"),
    ("Maldives", "MV"),
    ("Myanmar", "MM"),
    ("Cambodia", "KH"),
    ("Laos", "LA"),
    ("Mongolia", "MN"),
    ("North Korea", "KP"),
];

/// ISO code for a country name (case-insensitive).
pub fn lookup(name: &str) -> Option<&'static str> {
    let name = name.trim();
    COUNTRY_CODES
        .iter()
        .find(|(country, _)| country.eq_ignore_ascii_case(name))
        .map(|(_, code)| *code)
}

/// ISO code for a country name, or the input unchanged when unknown
/// (which is already correct when the input is a code).
pub fn country_code(name: &str) -> String {
    lookup(name).map(str::to_string).unwrap_or_else(|| name.to_string())
}

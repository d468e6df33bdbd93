use super::{Category, CategoryId};

/// Highest ID reserved for categories shipped with tooldeck.
pub const RESERVED_MAX_ID: CategoryId = 99;

const BUILTIN: &[(CategoryId, &str, &[&str])] = &[
    (
        1,
        "information_gathering",
        &[
            "acccheck", "ace-voip", "amap", "automater", "braa", "casefile", "cdpsnarf",
            "cisco-torch", "cookie-cadger", "copy-router-config", "dmitry", "dnmap", "dnsenum",
            "dnsmap", "dnsrecon", "dnstracer", "dnswalk", "dotdotpwn", "enum4linux", "enumiax",
            "exploitdb", "fierce", "firewalk", "fragroute", "fragrouter", "ghost-phisher",
            "golismero", "goofile", "lbd", "maltego-teeth", "masscan", "metagoofil", "miranda",
            "nmap", "p0f", "parsero", "recon-ng", "set", "smtp-user-enum", "snmpcheck",
            "sslcaudit", "sslsplit", "sslstrip", "sslyze", "thc-ipv6", "theharvester", "tlssled",
            "twofi", "urlcrazy", "wireshark", "wol-e", "xplico", "ismtp", "intrace", "hping3",
        ],
    ),
    (
        2,
        "vulnerability_analysis",
        &[
            "bbqsql", "bed", "cisco-auditing-tool", "cisco-global-exploiter", "cisco-ocs",
            "cisco-torch", "copy-router-config", "doona", "dotdotpwn",
            "greenbone-security-assistant", "hexorbase", "jsql", "lynis", "nmap", "ohrwurm",
            "openvas-cli", "openvas-manager", "openvas-scanner", "oscanner", "powerfuzzer",
            "sfuzz", "sidguesser", "siparmyknife", "sqlmap", "sqlninja", "sqlsus", "thc-ipv6",
            "tnscmd10g", "unix-privesc-check", "yersinia",
        ],
    ),
    (
        3,
        "wireless_attacks",
        &[
            "aircrack-ng", "asleap", "bluelog", "blueranger", "bluesnarfer", "bully", "cowpatty",
            "crackle", "eapmd5pass", "fern-wifi-cracker", "ghost-phisher", "giskismet", "gqrx",
            "kalibrate-rtl", "killerbee", "kismet", "mdk3", "mfcuk", "mfoc", "mfterm",
            "multimon-ng", "pixiewps", "reaver", "redfang", "spooftooph", "wifi-honey", "wifitap",
            "wifite",
        ],
    ),
    (
        4,
        "web_applications",
        &[
            "apache-users", "arachni", "bbqsql", "blindelephant", "burpsuite", "cutycapt",
            "davtest", "deblaze", "dirb", "dirbuster", "fimap", "funkload", "grabber",
            "jboss-autopwn", "joomscan", "jsql", "maltego-teeth", "padbuster", "paros", "parsero",
            "plecost", "powerfuzzer", "proxystrike", "recon-ng", "skipfish", "sqlmap", "sqlninja",
            "sqlsus", "ua-tester", "uniscan", "vega", "w3af", "webscarab", "websploit", "wfuzz",
            "wpscan", "xsser", "zaproxy",
        ],
    ),
    (
        5,
        "sniffing_spoofing",
        &[
            "burpsuite", "dnschef", "fiked", "hamster-sidejack", "hexinject", "iaxflood",
            "inviteflood", "ismtp", "mitmproxy", "ohrwurm", "protos-sip", "rebind", "responder",
            "rtpbreak", "rtpinsertsound", "rtpmixsound", "sctpscan", "siparmyknife", "sipp",
            "sipvicious", "sniffjoke", "sslsplit", "sslstrip", "thc-ipv6", "voiphopper",
            "webscarab", "wifi-honey", "wireshark", "xspy", "yersinia", "zaproxy",
        ],
    ),
    (
        6,
        "maintaining_access",
        &[
            "cryptcat", "cymothoa", "dbd", "dns2tcp", "http-tunnel", "httptunnel", "intersect",
            "nishang", "polenum", "powersploit", "pwnat", "ridenum", "sbd", "u3-pwn", "webshells",
            "weevely",
        ],
    ),
    (
        7,
        "reporting_tools",
        &[
            "casefile", "cutycapt", "dos2unix", "dradis", "keepnote", "magictree", "metagoofil",
            "nipper-ng", "pipal",
        ],
    ),
    (
        8,
        "exploitation_tools",
        &[
            "armitage", "backdoor-factory", "cisco-auditing-tool", "cisco-global-exploiter",
            "cisco-ocs", "cisco-torch", "crackle", "jboss-autopwn", "linux-exploit-suggester",
            "maltego-teeth", "set", "shellnoob", "sqlmap", "thc-ipv6", "yersinia", "beef-xss",
        ],
    ),
    (
        9,
        "forensics_tools",
        &[
            "binwalk", "bulk-extractor", "chntpw", "cuckoo", "dc3dd", "ddrescue", "dumpzilla",
            "extundelete", "foremost", "galleta", "guymager", "iphone-backup-analyzer", "p0f",
            "pdf-parser", "pdfid", "pdgmail", "peepdf", "volatility", "xplico",
        ],
    ),
    (
        10,
        "stress_testing",
        &[
            "dhcpig", "funkload", "iaxflood", "inviteflood", "ipv6-toolkit", "mdk3", "reaver",
            "rtpflood", "slowhttptest", "t50", "termineter", "thc-ipv6", "thc-ssl-dos",
        ],
    ),
    (
        11,
        "password_attacks",
        &[
            "acccheck", "burpsuite", "cewl", "chntpw", "cisco-auditing-tool", "cmospwd",
            "creddump", "crunch", "findmyhash", "gpp-decrypt", "hash-identifier", "hexorbase",
            "john", "johnny", "keimpx", "maltego-teeth", "maskprocessor", "multiforcer", "ncrack",
            "oclgausscrack", "pack", "patator", "polenum", "rainbowcrack", "rcracki-mt",
            "rsmangler", "statsprocessor", "thc-pptp-bruter", "truecrack", "webscarab",
            "wordlists", "zaproxy",
        ],
    ),
    (
        12,
        "reverse_engineering",
        &[
            "apktool", "dex2jar", "python-distorm3", "edb-debugger", "jad", "javasnoop", "jd",
            "ollydbg", "smali", "valgrind", "yara",
        ],
    ),
    (
        13,
        "hardware_hacking",
        &["android-sdk", "apktool", "arduino", "dex2jar", "sakis3g", "smali"],
    ),
    (14, "extra", &["squid"]),
];

/// The categories shipped with tooldeck, IDs 1 to 14.
pub fn builtin_categories() -> Vec<Category> {
    BUILTIN
        .iter()
        .map(|(id, name, tools)| Category::new(*id, *name, tools.iter().map(|t| t.to_string())))
        .collect()
}

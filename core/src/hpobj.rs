//! Helpers for calculator-side names and objects

/// Characters the calculator uses as object separators and delimiters,
/// plus math symbols
const ILLEGAL_NAME_CHARS: &str = concat!(" .,@", "#[]\"'{}():_", "+-*/^=<>!");

pub const MAX_NAME_LEN: usize = 127;

/// Built-in command names that cannot be used as variable names
/// (not exhaustive)
const HP48_CMDS: &[&str] = &[
    "ABS", "ACK", "ACKALL", "ACOS", "ACOSH", "ADD", "ALOG", "AMORT", "AND", "ANIMATE", "ANS",
    "APPLY", "ARC", "ARCHIVE", "ARG", "ASIN", "ASINH", "ASN", "ASR", "ATAN", "ATANH", "ATICK",
    "ATTACH", "AUTO", "AXES", "BAR", "BARPLOT", "BAUD", "BEEP", "BESTFIT", "BIN", "BINS",
    "BLANK", "BOX", "BUFLEN", "BYTES", "CASE", "CEIL", "CENTR", "CF", "%CH", "CHOOSE", "CHR",
    "CKSM", "CLEAR", "CLKADJ", "CLLCD", "CLOSEIO", "CLVAR", "CMPLX", "CNRM", "COLCT", "COMB",
    "CON", "COND", "CONIC", "CONJ", "CONLIB", "CONST", "CONT", "CONVERT", "CORR", "COS",
    "COSH", "COV", "CR", "CRDIR", "CROSS", "CSWP", "CYLIN", "DARCY", "DATE", "DATE+", "DBUG",
    "DDAYS", "DEC", "DECR", "DEFINE", "DEG", "DELALARM", "DELAY", "DELKEYS", "DEPND", "DEPTH",
    "DET", "DETACH", "DIFFEQ", "DIR", "DISP", "DISPXY", "DO", "DOERR", "DOLIST", "DOSUBS",
    "DOT", "DRAW", "DRAW3DMATRIX", "DRAX", "DROP", "DROP2", "DROPN", "DTAG", "DUP", "DUP2",
    "DUPDUP", "DUPN", "e", "EDIT", "EDITB", "EGV", "EGVL", "ELSE", "END", "ENDSUB", "ENG",
    "EQNLIB", "EQW", "ERASE", "ERR0", "ERRM", "ERRN", "EVAL", "EXP", "EXPAN", "EXPFIT",
    "EXPM", "EYEPT", "FACT", "FANNING", "FAST3D", "FC?", "FC?C", "FFT", "FILER", "FINDALARM",
    "FINISH", "FIX", "FLASHEVAL", "FLOOR", "FONT6", "FONT7", "FONT8", "FOR", "FP", "FREE",
    "FREEZE", "FS?", "FS?C", "FUNCTION", "GAMMA", "GET", "GETI", "GOR", "GRAD", "GRIDMAP",
    "GROB", "GROBADD", "GXOR", "HALT", "HEAD", "HEX", "HISTOGRAM", "HISTPLOT", "HOME", "i",
    "IDN", "IF", "IFERR", "IFFT", "IFT", "IFTE", "IM", "INCR", "INDEP", "INFORM", "INPUT",
    "INV", "IP", "ISOL", "KERRM", "KEY", "KEYEVAL", "KGET", "KILL", "LABEL", "LAST",
    "LASTARG", "LIBEVAL", "LIBS", "LINE", "LINFIT", "LININ", "LN", "LNP1", "LOG", "LOGFIT",
    "LQ", "LR", "LSQ", "LU", "MANT", "MAP", "MAX", "MAXR", "MCALC", "MEAN", "MEM", "MENU",
    "MERGE", "MIN", "MINEHUNT", "MINIT", "MINR", "MITM", "MOD", "MROOT", "MSGBOX", "MSOLVR",
    "MUSER", "NDIST", "NDUPN", "NEG", "NEWOB", "NEXT", "NIP", "NOT", "NOVAL", "NSUB", "NUM",
    "NUMX", "NUMY", "OCT", "OFF", "OLDPRT", "OPENIO", "OR", "ORDER", "OVER", "PARAMETRIC",
    "PARITY", "PARSURFACE", "PATH", "PCOEF", "PCONTOUR", "PCOV", "PDIM", "PERM", "PEVAL",
    "PGDIR", "PICK", "PICK3", "PICT", "PICTURE", "PINIT", "PIX?", "PIXOFF", "PIXON", "PKT",
    "PLOT", "PLOTADD", "PMAX", "PMIN", "POLAR", "POP", "POS", "PR1", "PREDV", "PREDX",
    "PREDY", "PRLCD", "PROMPT", "PROMPTSTO", "PROOT", "PRST", "PRSTC", "PRVAR", "PSDEV",
    "Psi", "PSI", "PURGE", "PUSH", "PUT", "PUTI", "PVAR", "PVARS", "PVIEW", "PWRFIT", "qr",
    "QR", "QUAD", "QUOTE", "RAD", "RAND", "RANK", "RANM", "RATIO", "RCEQ", "RCI", "RCIJ",
    "RCL", "RCLALARM", "RCLF", "RCLKEYS", "RCLMENU", "RCWS", "RDM", "RDZ", "RE", "RECN",
    "RECT", "RECV", "RENAME", "REPEAT", "REPL", "RES", "RESTORE", "REVLIST", "RKF", "RKFERR",
    "RKFSTEP", "RL", "RLB", "RND", "RNRM", "ROLL", "ROLLD", "ROOT", "ROT", "RR", "RRB", "RRK",
    "RRKSTEP", "RSBERR", "RSD", "RSWP", "RULES", "SAME", "SBRK", "SCALE", "SCALEH", "SCALEW",
    "SCATRPLOT", "SCATTER", "SCHUR", "SCI", "SCONJ", "SCROLL", "SDEV", "SEND", "SEQ",
    "SERVER", "SF", "SHOW", "SIDENS", "SIGN", "SIN", "SINH", "SINV", "SIZE", "SL", "SLB",
    "SLOPEFIELD", "SNEG", "SNRM", "SOLVEQN", "SOLVER", "SORT", "SPHERE", "SQ", "SR", "SRAD",
    "SRB", "SRECV", "SREPL", "START", "STD", "STEP", "STEQ", "STIME", "STO", "STO*", "STO+",
    "STO/", "STO-", "STOALARM", "STOF", "STOKEYS", "STREAM", "STWS", "SUB", "SVD", "SVL",
    "SWAP", "SYSEVAL", "%T", "TAIL", "TAN", "TANH", "TAYLR", "TDELTA", "TEVAL", "TEXT",
    "THEN", "TICKS", "TIME", "TINC", "TLINE", "TMENU", "TOT", "TRACE", "TRAN", "TRANSIO",
    "TRN", "TRNC", "TRUTH", "TSTR", "TVARS", "TVM", "TVMBEG", "TVMEND", "TVMROOT", "TYPE",
    "UBASE", "UFACT", "UNPICK", "UNROT", "UNTIL", "UPDIR", "UTPC", "UTPF", "UTPN", "UTPT",
    "UVAL", "VAR", "VARS", "VERSION", "VISIT", "VISITB", "VTYPE", "WAIT", "WHILE",
    "WIREFRAME", "WSLOG", "XCOL", "XGET", "XMIT", "XOR", "XPON", "XPUT", "XRECV", "XRNG",
    "XROOT", "XSEND", "XSERV", "XVOL", "XXRNG", "YCOL", "YRNG", "YSLICE", "YVOL", "YYRNG",
    "ZFACTOR", "ZVOL",
];

/// Turn `name` into a legal calculator variable name. Returns an empty
/// string when nothing legal is left.
pub fn valid_hp_name(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .filter(|c| !ILLEGAL_NAME_CHARS.contains(*c))
        .collect();
    if cleaned != name {
        log::warn!("Stripped illegal char(s) from name");
    }

    let digits = cleaned.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        cleaned.drain(..digits);
        log::warn!("Stripped leading digit(s)");
    }

    if HP48_CMDS.contains(&cleaned.as_str()) {
        log::warn!("{} is not allowed as a name.", cleaned);
        cleaned.clear();
    }

    cleaned.chars().take(MAX_NAME_LEN).collect()
}

/// Wrap text in double quotes so the calculator stores it as a string
pub fn quote(text: &[u8]) -> Vec<u8> {
    let mut quoted = Vec::with_capacity(text.len() + 2);
    quoted.push(b'"');
    quoted.extend_from_slice(text);
    quoted.push(b'"');
    quoted
}

/// Drop everything except printable ASCII and line feeds
pub fn filter_text(text: &[u8]) -> Vec<u8> {
    text.iter()
        .copied()
        .filter(|&b| b == b'\n' || (32..127).contains(&b))
        .collect()
}

const BIN_HEADER: &[u8] = b"HPHP48-P";
const STRING_PROLOG: u64 = 0x02A2C;
const PROLOG_NIBBLES: u64 = 5;

/// Wrap text as a binary calculator string object: header, prolog and
/// size in nibbles (5 bytes little-endian), the text, then a NUL
pub fn txt_to_hpbin(text: &[u8]) -> Vec<u8> {
    let size = 2 * text.len() as u64 + PROLOG_NIBBLES;
    let size_and_prolog = (size << (4 * PROLOG_NIBBLES)) | STRING_PROLOG;

    let mut bin = Vec::with_capacity(BIN_HEADER.len() + 5 + text.len() + 1);
    bin.extend_from_slice(BIN_HEADER);
    bin.extend_from_slice(&size_and_prolog.to_le_bytes()[..5]);
    bin.extend_from_slice(text);
    bin.push(0);
    bin
}

/// Serial parity applied to the high bit of 7-bit characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    pub const CHOICES: &'static [(&'static str, i64)] = &[
        ("none", 0),
        ("odd", 1),
        ("even", 2),
        ("mark", 3),
        ("space", 4),
    ];

    pub fn from_index(index: i64) -> Option<Parity> {
        match index {
            0 => Some(Parity::None),
            1 => Some(Parity::Odd),
            2 => Some(Parity::Even),
            3 => Some(Parity::Mark),
            4 => Some(Parity::Space),
            _ => None,
        }
    }

    pub fn index(self) -> i64 {
        self as i64
    }

    pub fn apply_byte(self, byte: u8) -> u8 {
        let ones = (byte & 0x7F).count_ones() as u8;
        match self {
            Parity::None => byte,
            Parity::Odd => byte | (((ones + 1) % 2) << 7),
            Parity::Even => byte | ((ones % 2) << 7),
            Parity::Mark => byte | 0x80,
            Parity::Space => byte & 0x7F,
        }
    }

    pub fn apply(self, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().map(|&b| self.apply_byte(b)).collect()
    }
}

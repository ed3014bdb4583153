//! Pre-baked encoder table
//!
//! Output of [`PiEncoder::derive`](crate::PiEncoder::derive), frozen so that
//! start-up does not run the BBP scan. `test_precomputed_matches_derived` in
//! the encoder keeps the two in lockstep.

/// Hex digits the scan reads before every byte value has been seen.
pub const SCAN_DIGITS: u32 = 370;

/// `BYTE_TO_OFFSET[b]` is the first π bit offset whose window reads `b`.
#[rustfmt::skip]
pub const BYTE_TO_OFFSET: [u16; 256] = [
      86,   85,  726,   84,  260,  864,  369,   83, 1349,  259, 1654,  855,  768,  226,   82,  694, // 0x00
     230,   39,  147,  116,   35,  165,  962,  646,  483,  674,  359,  225,  179,   81,  818,  693, // 0x10
     263,  229,   38,  902,  146,  257,  131,  115,  292,   34,  164, 2277,   65,  961,  853,  645, // 0x20
     192,  128,  323,  450,    4,  419,  564,   21,  178,  197,   80, 1143,  711,  112, 1301,  340, // 0x30
     385,  262,    0,  228,   49,   37, 1682,  901,  145,  500,  256,   67,  130,   23, 1073,  114, // 0x40
     291,  151,  245,   33,  161,  163, 1187, 1058,   64,  787, 1202,  629,  852,  928,  644,  407, // 0x50
      98,  183,   54,  481,  322,  785,  672,  449,    3, 1520, 1200,  418,  581,  563,  215,   20, // 0x60
     212,  177,  275,  196,   71,  918, 1142,  624, 1813,   17,  642,  103, 1620, 1300, 2420,  339, // 0x70
      96,  727,  261,  209,  546, 1655,  227,  181,   48,  117,   36,  647,  484,  471, 1153,  819, // 0x80
     272,  144,  320,  454,  247,  514,   66, 1012,  129,  324,    5,   22,  832,  439,  113,  341, // 0x90
     290,    1,  150, 2934,  244,   68,   32, 1510,  160,  503,  162, 1059, 1043,  630,  929,  416, // 0xA0
      99,   55,  786, 1909, 1363,  932,  935,  561,  213,  466,  871,  625,   18,  643, 1442,  406, // 0xB0
      97,  210,  547,  182,   53,  167,  480,  820,  273,  321,  784, 1105,  194,    6,  448,  886, // 0xC0
       2,  356,   69, 1511,  916, 1060,  631,  417,  100, 1910,  933,  562,  214,  626,   19, 1121, // 0xD0
     211,  548,  176,  677,  274, 1106,    7,  834,  436,   70,  917,  640,  101, 1141,  615, 1297, // 0xE0
    1618,  401,  709,   16, 1318,  641,  102,  807,  402,  336, 1440, 1223,  337, 1232,  338,  690, // 0xF0
];

//! Determinant strings, combinatorial addressing and excitation link tables.

use std::error::Error;
use std::fmt;

use itertools::Itertools;
use log;

#[cfg(test)]
#[path = "cistring_tests.rs"]
mod cistring_tests;

/// A bit-pattern occupation string for one spin channel of a Slater
/// determinant. Bit $`i`$ is set if and only if orbital $`i`$ is occupied.
pub type OrbString = u64;

/// The maximum number of orbitals representable in an [`OrbString`].
pub const MAX_NORB: usize = 64;

// ================
// Error definition
// ================

/// Errors arising from malformed electron counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectronCountError {
    /// The requested per-spin electron count does not fit the orbital space.
    Invalid { norb: usize, nelec: usize },

    /// A singlet-specialised routine was invoked with unequal alpha and beta
    /// electron counts.
    Asymmetric { neleca: usize, nelecb: usize },
}

impl fmt::Display for ElectronCountError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElectronCountError::Invalid { norb, nelec } => write!(
                f,
                "Invalid electron count: {nelec} electrons cannot occupy {norb} orbitals."
            ),
            ElectronCountError::Asymmetric { neleca, nelecb } => write!(
                f,
                "Unequal alpha and beta electron counts ({neleca}, {nelecb}) in a spin-0 context."
            ),
        }
    }
}

impl Error for ElectronCountError {}

// =============
// ElectronCount
// =============

/// An electron-count specification: either a total count (a singlet context
/// then implies `n/2` electrons per spin channel) or an explicit
/// `(alpha, beta)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectronCount {
    /// Total number of electrons over both spin channels.
    Total(usize),

    /// Explicit `(alpha, beta)` electron counts.
    PerSpin(usize, usize),
}

impl ElectronCount {
    /// Returns the `(alpha, beta)` electron counts, splitting a total count
    /// with any odd electron assigned to the alpha channel.
    pub fn counts(self) -> (usize, usize) {
        match self {
            ElectronCount::Total(n) => (n.div_euclid(2) + n.rem_euclid(2), n.div_euclid(2)),
            ElectronCount::PerSpin(na, nb) => (na, nb),
        }
    }

    /// Returns the total number of electrons.
    pub fn total(self) -> usize {
        match self {
            ElectronCount::Total(n) => n,
            ElectronCount::PerSpin(na, nb) => na + nb,
        }
    }

    /// Returns the per-spin electron count of a singlet specification, or an
    /// [`ElectronCountError::Asymmetric`] error if the alpha and beta counts
    /// differ.
    pub fn singlet(self) -> Result<usize, ElectronCountError> {
        let (neleca, nelecb) = self.counts();
        if neleca == nelecb {
            Ok(neleca)
        } else {
            Err(ElectronCountError::Asymmetric { neleca, nelecb })
        }
    }
}

impl From<usize> for ElectronCount {
    fn from(n: usize) -> Self {
        ElectronCount::Total(n)
    }
}

impl From<(usize, usize)> for ElectronCount {
    fn from((na, nb): (usize, usize)) -> Self {
        ElectronCount::PerSpin(na, nb)
    }
}

// ======================
// Combinatorial indexing
// ======================

/// Computes the binomial coefficient $`\binom{n}{k}`$, returning `0` when
/// `k > n`.
pub(crate) fn binomial(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 0..k {
        // Exact at every step: the running product of i+1 consecutive
        // integers is divisible by (i+1)!.
        acc = acc * (n - i) as u128 / (i + 1) as u128;
    }
    acc as usize
}

fn validate_counts(norb: usize, nelec: usize) -> Result<(), ElectronCountError> {
    if norb > MAX_NORB || nelec > norb {
        Err(ElectronCountError::Invalid { norb, nelec })
    } else {
        Ok(())
    }
}

/// Returns the number of determinant strings of `nelec` electrons in `norb`
/// orbitals, *i.e.* $`\binom{n_{\mathrm{orb}}}{n_{\mathrm{elec}}}`$.
pub fn num_strings(norb: usize, nelec: usize) -> usize {
    binomial(norb, nelec)
}

/// Generates all determinant strings of `nelec` electrons in `norb` orbitals
/// in address order (equivalently, in ascending bit-pattern order).
pub fn make_strings(norb: usize, nelec: usize) -> Result<Vec<OrbString>, ElectronCountError> {
    validate_counts(norb, nelec)?;
    if nelec == 0 {
        return Ok(vec![0]);
    }
    let n = num_strings(norb, nelec);
    let mut strings = Vec::with_capacity(n);
    let mut s: OrbString = if nelec == MAX_NORB {
        u64::MAX
    } else {
        (1u64 << nelec) - 1
    };
    for k in 0..n {
        strings.push(s);
        if k + 1 < n {
            // Gosper's hack: next-higher integer with the same popcount.
            let c = s & s.wrapping_neg();
            let r = s + c;
            s = (((r ^ s) >> 2) / c) | r;
        }
    }
    Ok(strings)
}

/// Ranks a determinant string into its dense address via the combinatorial
/// number system: for occupied bit positions $`i_1 < i_2 < \ldots < i_k`$,
/// the address is $`\sum_j \binom{i_j}{j}`$.
pub fn str2addr(norb: usize, nelec: usize, string: OrbString) -> usize {
    debug_assert_eq!(
        string.count_ones() as usize, nelec,
        "String {string:#b} does not contain {nelec} electrons."
    );
    let mut addr = 0;
    let mut j = 0;
    for i in 0..norb {
        if string >> i & 1 == 1 {
            j += 1;
            addr += binomial(i, j);
        }
    }
    addr
}

/// Unranks a dense address back into its determinant string, the closed-form
/// inverse of [`str2addr`]: the highest electron is placed greedily at the
/// largest orbital $`i`$ with $`\binom{i}{k} \le \mathrm{addr}`$, and so on
/// down.
pub fn addr2str(norb: usize, nelec: usize, addr: usize) -> OrbString {
    debug_assert!(
        addr < num_strings(norb, nelec),
        "Address {addr} out of range for ({norb}, {nelec})."
    );
    let mut string: OrbString = 0;
    let mut rem = addr;
    for j in (1..=nelec).rev() {
        let mut i = j - 1;
        while i + 1 < norb && binomial(i + 1, j) <= rem {
            i += 1;
        }
        string |= 1 << i;
        rem -= binomial(i, j);
    }
    string
}

// ==============
// Fermionic sign
// ==============

/// Returns the fermionic parity $`(-1)^m`$ where $`m`$ is the number of
/// occupied orbitals in `string` strictly above orbital `p`.
pub(crate) fn sign_above(string: OrbString, p: usize) -> i8 {
    if p + 1 >= MAX_NORB {
        return 1;
    }
    if (string >> (p + 1)).count_ones() % 2 == 0 {
        1
    } else {
        -1
    }
}

/// Returns the parity of the occupied orbitals of `string` strictly between
/// orbitals `p` and `q`.
fn sign_between(string: OrbString, p: usize, q: usize) -> i8 {
    let (lo, hi) = if p < q { (p, q) } else { (q, p) };
    if hi - lo < 2 {
        return 1;
    }
    let mask = ((1u64 << hi) - 1) & !((1u64 << (lo + 1)) - 1);
    if (string & mask).count_ones() % 2 == 0 {
        1
    } else {
        -1
    }
}

// ===========
// Link tables
// ===========

/// A single-excitation link: $`a^+_{\mathrm{cre}} a_{\mathrm{des}}`$ applied
/// to the origin string yields `sign` times the string at `addr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    /// Orbital on which the creation operator acts.
    pub cre: usize,

    /// Orbital on which the annihilation operator acts.
    pub des: usize,

    /// Address of the destination string.
    pub addr: usize,

    /// Fermionic sign, always $`\pm 1`$.
    pub sign: i8,
}

/// A single-excitation link with the `(cre, des)` orbital pair compressed to
/// its triangular pair index, for contraction against 4-fold packed
/// symmetric integral tensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrilLink {
    /// Triangular orbital-pair index `max(max+1)/2 + min`.
    pub pq: usize,

    /// Address of the destination string.
    pub addr: usize,

    /// Fermionic sign, always $`\pm 1`$.
    pub sign: i8,
}

/// A creation-only or annihilation-only link into an electron-number-shifted
/// string space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpLink {
    /// Orbital on which the operator acts.
    pub orb: usize,

    /// Address of the destination string in the shifted space.
    pub addr: usize,

    /// Fermionic sign, always $`\pm 1`$.
    pub sign: i8,
}

/// A rectangular table of links with a fixed number of entries per origin
/// string address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkIndex<L> {
    links: Vec<L>,
    num_strings: usize,
    num_links: usize,
}

impl<L> LinkIndex<L> {
    fn from_rows(rows: Vec<Vec<L>>) -> Self {
        let num_strings = rows.len();
        let num_links = rows.first().map_or(0, Vec::len);
        debug_assert!(
            rows.iter().all(|r| r.len() == num_links),
            "Link table rows have inconsistent lengths."
        );
        LinkIndex {
            links: rows.into_iter().flatten().collect(),
            num_strings,
            num_links,
        }
    }

    /// Number of origin string addresses indexed by this table.
    pub fn num_strings(&self) -> usize {
        self.num_strings
    }

    /// Number of links recorded per origin string address.
    pub fn num_links(&self) -> usize {
        self.num_links
    }

    /// The links originating from string address `addr`.
    pub fn row(&self, addr: usize) -> &[L] {
        &self.links[addr * self.num_links..(addr + 1) * self.num_links]
    }
}

/// Excitation link table over one string space.
pub type LinkTable = LinkIndex<Link>;

/// Triangular-pair-compressed excitation link table.
pub type TrilLinkTable = LinkIndex<TrilLink>;

/// Creation-only or annihilation-only link table between two string spaces.
pub type OpLinkTable = LinkIndex<OpLink>;

/// Returns the triangular index of the orbital pair `(p, q)`.
pub(crate) fn tril_index(p: usize, q: usize) -> usize {
    let (lo, hi) = if p < q { (p, q) } else { (q, p) };
    hi * (hi + 1) / 2 + lo
}

/// Builds the single-excitation link table for `nelec` electrons in `norb`
/// orbitals.
///
/// For every origin string, the row lists first the `nelec` diagonal
/// $`a^+_p a_p`$ entries over the occupied orbitals, then the
/// `nelec * (norb - nelec)` off-diagonal excitations $`a^+_a a_i`$ with `i`
/// occupied and `a` virtual. The sign of an off-diagonal entry is the parity
/// of the occupied orbitals strictly between `i` and `a` in the origin
/// string.
pub fn gen_linkstr_index(norb: usize, nelec: usize) -> Result<LinkTable, ElectronCountError> {
    let strings = make_strings(norb, nelec)?;
    let rows = strings
        .iter()
        .map(|&str0| {
            let occ = (0..norb).filter(|&i| str0 >> i & 1 == 1).collect_vec();
            let vir = (0..norb).filter(|&i| str0 >> i & 1 == 0).collect_vec();
            let mut row = Vec::with_capacity(nelec * (norb - nelec) + nelec);
            let addr0 = str2addr(norb, nelec, str0);
            for &i in &occ {
                row.push(Link {
                    cre: i,
                    des: i,
                    addr: addr0,
                    sign: 1,
                });
            }
            for &i in &occ {
                for &a in &vir {
                    let str1 = str0 & !(1 << i) | (1 << a);
                    row.push(Link {
                        cre: a,
                        des: i,
                        addr: str2addr(norb, nelec, str1),
                        sign: sign_between(str0, i, a),
                    });
                }
            }
            row
        })
        .collect_vec();
    Ok(LinkIndex::from_rows(rows))
}

/// Builds the single-excitation link table with orbital pairs compressed to
/// triangular pair indices (see [`TrilLink`]), for contraction against
/// 4-fold packed symmetric tensors.
pub fn gen_linkstr_index_trilidx(
    norb: usize,
    nelec: usize,
) -> Result<TrilLinkTable, ElectronCountError> {
    let table = gen_linkstr_index(norb, nelec)?;
    let rows = (0..table.num_strings())
        .map(|addr| {
            table
                .row(addr)
                .iter()
                .map(|l| TrilLink {
                    pq: tril_index(l.cre, l.des),
                    addr: l.addr,
                    sign: l.sign,
                })
                .collect_vec()
        })
        .collect_vec();
    Ok(LinkIndex::from_rows(rows))
}

/// Builds the creation-only link table from the `nelec` string space into
/// the `nelec + 1` string space: row `addr` lists, for every virtual orbital
/// `a` of the origin string, the signed address of $`a^+_a`$ applied to it.
pub fn gen_cre_str_index(norb: usize, nelec: usize) -> Result<OpLinkTable, ElectronCountError> {
    if nelec + 1 > norb {
        log::error!("Creation link table requested out of the orbital space.");
        return Err(ElectronCountError::Invalid {
            norb,
            nelec: nelec + 1,
        });
    }
    let strings = make_strings(norb, nelec)?;
    let rows = strings
        .iter()
        .map(|&str0| {
            (0..norb)
                .filter(|&a| str0 >> a & 1 == 0)
                .map(|a| OpLink {
                    orb: a,
                    addr: str2addr(norb, nelec + 1, str0 | (1 << a)),
                    sign: sign_above(str0, a),
                })
                .collect_vec()
        })
        .collect_vec();
    Ok(LinkIndex::from_rows(rows))
}

/// Builds the annihilation-only link table from the `nelec` string space
/// into the `nelec - 1` string space: row `addr` lists, for every occupied
/// orbital `i` of the origin string, the signed address of $`a_i`$ applied
/// to it.
pub fn gen_des_str_index(norb: usize, nelec: usize) -> Result<OpLinkTable, ElectronCountError> {
    if nelec == 0 {
        log::error!("Annihilation link table requested for an empty string space.");
        return Err(ElectronCountError::Invalid { norb, nelec });
    }
    let strings = make_strings(norb, nelec)?;
    let rows = strings
        .iter()
        .map(|&str0| {
            (0..norb)
                .filter(|&i| str0 >> i & 1 == 1)
                .map(|i| OpLink {
                    orb: i,
                    addr: str2addr(norb, nelec - 1, str0 & !(1 << i)),
                    sign: sign_above(str0, i),
                })
                .collect_vec()
        })
        .collect_vec();
    Ok(LinkIndex::from_rows(rows))
}

use itertools::Itertools;

use crate::cistring::{
    addr2str, gen_cre_str_index, gen_des_str_index, gen_linkstr_index, gen_linkstr_index_trilidx,
    make_strings, num_strings, str2addr, tril_index, ElectronCount, ElectronCountError,
};

#[test]
fn test_cistring_num_strings() {
    assert_eq!(num_strings(4, 2), 6);
    assert_eq!(num_strings(6, 3), 20);
    assert_eq!(num_strings(8, 4), 70);
    assert_eq!(num_strings(13, 6), 1716);
    assert_eq!(num_strings(5, 0), 1);
    assert_eq!(num_strings(5, 5), 1);
    assert_eq!(num_strings(3, 4), 0);
}

#[test]
fn test_cistring_make_strings() {
    assert_eq!(make_strings(4, 0).unwrap(), vec![0b0000]);
    assert_eq!(
        make_strings(4, 2).unwrap(),
        vec![0b0011, 0b0101, 0b0110, 0b1001, 0b1010, 0b1100]
    );
    assert_eq!(make_strings(4, 4).unwrap(), vec![0b1111]);

    // Address order coincides with ascending bit-pattern order.
    let strings = make_strings(9, 4).unwrap();
    assert_eq!(strings.len(), num_strings(9, 4));
    assert!(strings.windows(2).all(|w| w[0] < w[1]));
    assert!(strings.iter().all(|s| s.count_ones() == 4));

    assert!(matches!(
        make_strings(4, 5),
        Err(ElectronCountError::Invalid { norb: 4, nelec: 5 })
    ));
}

#[test]
fn test_cistring_address_bijection() {
    for norb in 0..=9 {
        for nelec in 0..=norb {
            let strings = make_strings(norb, nelec).unwrap();
            for (addr, &string) in strings.iter().enumerate() {
                assert_eq!(str2addr(norb, nelec, string), addr);
                assert_eq!(addr2str(norb, nelec, addr), string);
            }
        }
    }
}

#[test]
fn test_cistring_electron_count() {
    assert_eq!(ElectronCount::from(6).counts(), (3, 3));
    assert_eq!(ElectronCount::from(7).counts(), (4, 3));
    assert_eq!(ElectronCount::from((2, 4)).counts(), (2, 4));
    assert_eq!(ElectronCount::from(6).total(), 6);
    assert_eq!(ElectronCount::from((2, 4)).total(), 6);

    assert_eq!(ElectronCount::from(6).singlet().unwrap(), 3);
    assert_eq!(ElectronCount::from((3, 3)).singlet().unwrap(), 3);
    assert!(matches!(
        ElectronCount::from(7).singlet(),
        Err(ElectronCountError::Asymmetric {
            neleca: 4,
            nelecb: 3
        })
    ));
    assert!(ElectronCount::from((2, 1)).singlet().is_err());
}

/// Applies a link entry to a string with explicit bit manipulation and an
/// explicit operator-reordering parity count, independently of the table
/// builder's arithmetic.
fn apply_excitation(norb: usize, string: u64, cre: usize, des: usize) -> Option<(u64, i8)> {
    if string >> des & 1 == 0 {
        return None;
    }
    let mut sign = 1i8;
    let mut s = string;
    for k in des + 1..norb {
        if s >> k & 1 == 1 {
            sign = -sign;
        }
    }
    s &= !(1 << des);
    if s >> cre & 1 == 1 {
        return None;
    }
    for k in cre + 1..norb {
        if s >> k & 1 == 1 {
            sign = -sign;
        }
    }
    s |= 1 << cre;
    Some((s, sign))
}

#[test]
fn test_cistring_linkstr_index() {
    for (norb, nelec) in [(4, 2), (5, 2), (6, 3), (7, 4)] {
        let table = gen_linkstr_index(norb, nelec).unwrap();
        let strings = make_strings(norb, nelec).unwrap();
        assert_eq!(table.num_strings(), strings.len());
        assert_eq!(table.num_links(), nelec + nelec * (norb - nelec));
        for (addr, &str0) in strings.iter().enumerate() {
            let row = table.row(addr);
            // Diagonal entries lead the row with unit sign.
            for link in &row[..nelec] {
                assert_eq!(link.cre, link.des);
                assert_eq!(link.addr, addr);
                assert_eq!(link.sign, 1);
                assert_eq!(str0 >> link.cre & 1, 1);
            }
            // Every off-diagonal entry reproduces the explicit
            // bit-manipulation result.
            for link in &row[nelec..] {
                let (str1, sign) = apply_excitation(norb, str0, link.cre, link.des)
                    .expect("Link entry annihilates an empty orbital.");
                assert_eq!(link.addr, str2addr(norb, nelec, str1));
                assert_eq!(link.sign, sign);
                assert!(link.sign == 1 || link.sign == -1);
            }
        }
    }
}

#[test]
fn test_cistring_linkstr_index_trilidx() {
    let norb = 5;
    let nelec = 2;
    let table = gen_linkstr_index(norb, nelec).unwrap();
    let tril = gen_linkstr_index_trilidx(norb, nelec).unwrap();
    assert_eq!(tril.num_strings(), table.num_strings());
    assert_eq!(tril.num_links(), table.num_links());
    let npair = norb * (norb + 1) / 2;
    for addr in 0..table.num_strings() {
        for (l, t) in table.row(addr).iter().zip_eq(tril.row(addr)) {
            assert_eq!(t.pq, tril_index(l.cre, l.des));
            assert!(t.pq < npair);
            assert_eq!(t.addr, l.addr);
            assert_eq!(t.sign, l.sign);
        }
    }
    // The pair index is symmetric in the two orbital labels.
    assert_eq!(tril_index(3, 1), tril_index(1, 3));
    assert_eq!(tril_index(2, 2), 2 * 3 / 2 + 2);
}

#[test]
fn test_cistring_cre_des_index() {
    let norb = 5;
    let nelec = 2;
    let cre = gen_cre_str_index(norb, nelec).unwrap();
    let des = gen_des_str_index(norb, nelec + 1).unwrap();
    assert_eq!(cre.num_strings(), num_strings(norb, nelec));
    assert_eq!(cre.num_links(), norb - nelec);
    assert_eq!(des.num_strings(), num_strings(norb, nelec + 1));
    assert_eq!(des.num_links(), nelec + 1);

    let strings = make_strings(norb, nelec).unwrap();
    for (addr, &str0) in strings.iter().enumerate() {
        for link in cre.row(addr) {
            assert_eq!(str0 >> link.orb & 1, 0);
            let str1 = str0 | (1 << link.orb);
            assert_eq!(link.addr, str2addr(norb, nelec + 1, str1));
            // Annihilating the freshly created electron undoes the creation
            // with the same sign, so the round trip carries sign^2 = +1.
            let back = des
                .row(link.addr)
                .iter()
                .find(|l| l.orb == link.orb)
                .expect("No matching annihilation link.");
            assert_eq!(back.addr, addr);
            assert_eq!(back.sign, link.sign);
        }
    }

    assert!(gen_cre_str_index(4, 4).is_err());
    assert!(gen_des_str_index(4, 0).is_err());
}

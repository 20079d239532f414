//! Utilities for parsing the plain ASCII expression syntaxes the engine consumes: symmetry
//! operation triplets like `-y,x-y,z+1/3`, Wyckoff position expressions like `x,2x,1/4`,
//! and decimal numbers with optional standard-deviation suffixes like `1.2345(12)`.

use nom::branch::alt;
use nom::character::complete::{char, digit1, multispace0, one_of};
use nom::combinator::{map, map_res, opt, recognize};
use nom::error::ParseError;
use nom::multi::many1;
use nom::sequence::{delimited, pair, preceded, separated_pair};
use nom::IResult;
use num_traits::Signed;

use crate::fract::{BaseInt, Rational};
use crate::symop::SymOp;
use crate::tensor::TensorError;

/// One additive term of a coordinate expression.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Term {
    /// `c·x`, `c·y` or `c·z` with a small integer coefficient.
    Var(i8, usize),
    /// A bare number: integer, fraction or decimal.
    Num(Rational),
}

/// A combinator that eats whitespace around `inner`.
fn ws<'a, F: 'a, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn unsigned_int(input: &str) -> IResult<&str, BaseInt> {
    map_res(digit1, |s: &str| s.parse::<BaseInt>())(input)
}

fn axis(input: &str) -> IResult<&str, usize> {
    map(one_of("xyzXYZ"), |c| match c.to_ascii_lowercase() {
        'x' => 0,
        'y' => 1,
        _ => 2,
    })(input)
}

fn decimal(input: &str) -> IResult<&str, Rational> {
    map_res(
        recognize(separated_pair(digit1, char('.'), digit1)),
        |s: &str| s.parse::<Rational>(),
    )(input)
}

fn fraction_or_int(input: &str) -> IResult<&str, Rational> {
    map(
        pair(unsigned_int, opt(preceded(ws(char('/')), unsigned_int))),
        |(n, d)| Rational::new(n, d.unwrap_or(1)),
    )(input)
}

fn term(input: &str) -> IResult<&str, Term> {
    alt((
        map(pair(opt(unsigned_int), axis), |(c, v)| {
            Term::Var(c.unwrap_or(1) as i8, v)
        }),
        map(decimal, Term::Num),
        map(fraction_or_int, Term::Num),
    ))(input)
}

fn signed_term(input: &str) -> IResult<&str, Term> {
    let (rest, (sign, t)) = pair(ws(opt(one_of("+-"))), term)(input)?;
    let t = if sign == Some('-') {
        match t {
            Term::Var(c, v) => Term::Var(-c, v),
            Term::Num(r) => Term::Num(-r),
        }
    } else {
        t
    };
    Ok((rest, t))
}

/// Parses one coordinate expression into variable coefficients and a constant.
fn coordinate(input: &str) -> IResult<&str, ([i8; 3], Rational)> {
    let (rest, terms) = many1(ws(signed_term))(input)?;
    let mut coefs = [0i8; 3];
    let mut constant = Rational::ZERO;
    for t in terms {
        match t {
            Term::Var(c, v) => coefs[v] += c,
            Term::Num(r) => constant = constant + r,
        }
    }
    Ok((rest, (coefs, constant)))
}

fn triplet(input: &str) -> Result<([[i8; 3]; 3], [Rational; 3]), TensorError> {
    let parts: Vec<&str> = input.split(',').collect();
    if parts.len() != 3 {
        return Err(TensorError::BadNumber(input.to_owned()));
    }
    let mut rot = [[0i8; 3]; 3];
    let mut trans = [Rational::ZERO; 3];
    for (i, part) in parts.iter().enumerate() {
        let (rest, (coefs, constant)) =
            coordinate(part).map_err(|_| TensorError::BadNumber(input.to_owned()))?;
        if !rest.trim().is_empty() {
            return Err(TensorError::BadNumber(input.to_owned()));
        }
        rot[i] = coefs;
        trans[i] = constant;
    }
    Ok((rot, trans))
}

/// Parses a symmetry operation triplet. The translation is canonicalized into `[0,1)`,
/// which folds the sign conventions found in tabulated data (`-1/4 ≡ 3/4`, `-1/2 ≡ 1/2`).
pub fn parse_symop(input: &str) -> Result<SymOp, TensorError> {
    let (rot, trans) = triplet(input)?;
    Ok(SymOp::new(rot, trans))
}

/// Parses a Wyckoff position expression such as `x,2x,1/4`. Unlike [`parse_symop`] the
/// constants are kept as written; matching against site coordinates reduces modulo 1 at
/// the comparison site instead.
pub fn parse_position_expr(input: &str) -> Result<([[i8; 3]; 3], [Rational; 3]), TensorError> {
    triplet(input)
}

/// Splits a decimal string into a value and an uncertainty interval half-width.
///
/// A `/` form is exact (delta 0). A `(sd)` suffix scales the given deviation digits into
/// the last decimal places. Otherwise the implied accuracy is half a unit in the place
/// after the last printed digit, capped at `min_accuracy`: `0.33` is taken to mean
/// `0.3300 ± 1/10000` rather than `1/3`, while `0.3333` rounds back to `1/3`.
fn value_and_delta(
    input: &str,
    min_accuracy: Option<Rational>,
) -> Result<(Rational, Rational), TensorError> {
    let arg = input.trim().to_ascii_uppercase();
    let bad = || TensorError::BadNumber(input.to_owned());

    if arg.contains('/') {
        return Ok((arg.parse()?, Rational::ZERO));
    }

    let (value_str, sd, inferred) = if let Some(open) = arg.find('(') {
        let close = arg.find(')').ok_or_else(bad)?;
        (arg[..open].to_owned(), arg[open + 1..close].to_owned(), false)
    } else if min_accuracy.is_some() {
        let mut v = arg.clone();
        if v.contains('.') {
            v.push('0');
        } else {
            v.push_str(".0");
        }
        (v, "5".to_owned(), true)
    } else {
        return Ok((arg.parse()?, Rational::ZERO));
    };

    let (mantissa, exponent) = match value_str.split_once('E') {
        Some((m, e)) => (m.to_owned(), e.parse::<i32>().map_err(|_| bad())?),
        None => (value_str.clone(), 0),
    };

    let numdigits = mantissa.bytes().filter(|b| b.is_ascii_digit()).count();
    if numdigits < sd.len() || !sd.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let mut replace: Vec<u8> = vec![b'0'; numdigits - sd.len()];
    replace.extend(sd.bytes());
    let mut it = replace.into_iter();
    let delta_str: String = mantissa
        .chars()
        .map(|c| if c.is_ascii_digit() { it.next().unwrap() as char } else { c })
        .collect();
    let mut delta: Rational = delta_str.parse::<Rational>()?;
    delta = delta.abs();

    let mut value: Rational = mantissa.parse()?;
    if exponent != 0 {
        let scale = Rational::new(10, 1);
        for _ in 0..exponent.abs() {
            value = if exponent > 0 { value * scale } else { value / scale };
            delta = if exponent > 0 { delta * scale } else { delta / scale };
        }
    }

    if inferred {
        if let Some(acc) = min_accuracy {
            if delta > acc {
                delta = acc;
            }
        }
    }
    Ok((value, delta))
}

/// Default minimum accuracy assumed for plain decimal input.
pub fn default_min_accuracy() -> Rational {
    Rational::new(1, 10000)
}

/// Parses a decimal (or fraction) string to the exact rational it is most plausibly
/// describing: the shortest continued-fraction rational inside
/// `[value − delta, value + delta]`.
pub fn parse_decimal(input: &str, min_accuracy: Option<Rational>) -> Result<Rational, TensorError> {
    let (value, delta) = value_and_delta(input, min_accuracy)?;
    if delta == Rational::ZERO {
        Ok(value)
    } else {
        Ok(Rational::best_in_interval(
            value.checked_sub(delta)?,
            value.checked_add(delta)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rat;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_symop_parse() {
        let op = parse_symop("x,y,z").unwrap();
        assert!(op.is_identity());

        let op = parse_symop("-y, x-y, z+1/3").unwrap();
        assert_eq!(op.rot, [[0, -1, 0], [1, -1, 0], [0, 0, 1]]);
        assert_eq!(op.trans, [rat!(0), rat!(0), rat!(1 / 3)]);

        let op = parse_symop("1/2+x, -z, y").unwrap();
        assert_eq!(op.rot, [[1, 0, 0], [0, 0, -1], [0, 1, 0]]);
        assert_eq!(op.trans[0], rat!(1 / 2));
    }

    #[test]
    fn test_symop_folding() {
        // Opposite-sign fractions fold into [0,1).
        let op = parse_symop("x-1/4,y-1/2,z-1/6").unwrap();
        assert_eq!(op.trans, [rat!(3 / 4), rat!(1 / 2), rat!(5 / 6)]);
    }

    #[test]
    fn test_position_expr() {
        let (rot, trans) = parse_position_expr("x,2x,1/4").unwrap();
        assert_eq!(rot, [[1, 0, 0], [2, 0, 0], [0, 0, 0]]);
        assert_eq!(trans[2], rat!(1 / 4));

        let (rot, _) = parse_position_expr("x,-x,z").unwrap();
        assert_eq!(rot, [[1, 0, 0], [-1, 0, 0], [0, 0, 1]]);
    }

    #[test]
    fn test_bad_symop() {
        assert!(parse_symop("x,y").is_err());
        assert!(parse_symop("x,y,w").is_err());
        assert!(parse_symop("x,y,z,1").is_err());
    }

    #[test]
    fn test_parse_decimal_inferred() {
        let acc = Some(default_min_accuracy());
        assert_eq!(parse_decimal("0.3333", acc).unwrap(), rat!(1 / 3));
        assert_eq!(parse_decimal("0.33", acc).unwrap(), Rational::new(33, 100));
        assert_eq!(parse_decimal("0.5", acc).unwrap(), rat!(1 / 2));
        assert_eq!(parse_decimal("8.04", acc).unwrap(), Rational::new(804, 100));
        assert_eq!(parse_decimal("2", acc).unwrap(), rat!(2));
    }

    #[test]
    fn test_parse_decimal_sd() {
        assert_eq!(
            parse_decimal("0.333(5)", None).unwrap(),
            rat!(1 / 3)
        );
        // 1.5(5) covers [1.0, 2.0]; the shortest rational inside is 1... but the interval
        // walk lands on the simplest interior value, 2 being the closed upper end.
        let v = parse_decimal("1.5(5)", None).unwrap();
        assert!(v >= rat!(1) && v <= rat!(2));
    }

    #[test]
    fn test_parse_decimal_exact() {
        assert_eq!(parse_decimal("1/3", None).unwrap(), rat!(1 / 3));
        assert_eq!(parse_decimal("0.25", None).unwrap(), rat!(1 / 4));
        assert_eq!(
            parse_decimal("0.333333333333333333", None).unwrap(),
            Rational::new(333333333333333333, 1000000000000000000)
        );
    }

    #[test]
    fn test_nineteen_digit_roundtrip() {
        // The POSCAR writer prints 19 decimals; any denominator up to 1e9 must survive.
        for r in [rat!(1 / 3), rat!(2 / 7), Rational::new(123456789, 999999937)] {
            let printed = r.to_decimal_string(19);
            let back = parse_decimal(&printed, Some(default_min_accuracy())).unwrap();
            assert_eq!(back, r, "through {}", printed);
        }
    }
}

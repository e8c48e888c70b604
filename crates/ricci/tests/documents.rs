use algebra::Expr;
use ricci::ast::{Index, Node, TensorRef};
use ricci::table::{distinct_components, Symmetry, TensorValue};
use ricci::{parse_document, Context, Document, ErrorKind, Value};

fn tensor<'a>(document: &'a Document, name: &str) -> &'a TensorValue {
    match document.get(name) {
        Some(Value::Tensor(value)) => value,
        other => panic!("`{name}` is not a tensor: {other:?}"),
    }
}

fn component(document: &Document, name: &str, index: &[usize]) -> String {
    tensor(document, name).get(index).unwrap().to_string()
}

macro_rules! document_tests {
    ( $( ($name: ident, $source: expr, $symbol: expr, $want: expr), )+ ) => {
        $(
        #[test]
        fn $name() {
            let document = parse_document($source).unwrap();
            let got = document.get($symbol).unwrap().to_string();
            similar_asserts::assert_eq!(got: got, want: $want);
        }
        )+
    };
}

document_tests!(
    (
        trace,
        r"
        % def hUD (4);
        h = h^\mu{}_\mu
        ",
        "h",
        "hUD00 + hUD11 + hUD22 + hUD33"
    ),
    (
        metric_contraction,
        r"
        % def sym01 RUU (2), metric gDD (2);
        R = g_{ab} R^{ab}
        ",
        "R",
        "RUU00*gDD00 + 2*RUU01*gDD01 + RUU11*gDD11"
    ),
    (
        cross_product,
        r"
        % def permutation epsilonDDD (3), vU (3), wU (3);
        u_i = \epsilon_{ijk} v^j w^k
        ",
        "uD",
        "[vU1*wU2 - vU2*wU1, -vU0*wU2 + vU2*wU0, vU0*wU1 - vU1*wU0]"
    ),
    (
        inverse_function,
        r"y = \sin^{-1}(x)",
        "y",
        "asin(x)"
    ),
    (
        natural_logarithm,
        r"y = 2\ln{x}",
        "y",
        "2*log(x)"
    ),
    (
        cancelled_inverse_functions,
        r"z = e^{\ln x}+\sin(\sin^{-1}y)-\tanh(xy)",
        "z",
        "x + y - tanh(x*y)"
    ),
    (
        comma_derivative,
        r"
        % def vU (2);
        w^a_b = v^a_{,b}
        ",
        "wUD",
        "[[vU_dD00, vU_dD01], [vU_dD10, vU_dD11]]"
    ),
);

/// Number of distinct nonzero components, counting a component and its negative once.
fn distinct_nonzero(tensor: &TensorValue) -> usize {
    let mut seen = std::collections::BTreeSet::new();
    for (_, expr) in tensor.iter() {
        if expr.is_zero() {
            continue;
        }
        let text = expr.to_string();
        if text.starts_with('-') {
            seen.insert(expr.clone().neg().to_string());
        } else {
            seen.insert(text);
        }
    }
    seen.len()
}

macro_rules! component_count_tests {
    ( $( ($name: ident, $source: expr, $symbol: expr, $want: expr), )+ ) => {
        $(
        #[test]
        fn $name() {
            let document = parse_document($source).unwrap();
            assert_eq!(distinct_nonzero(tensor(&document, $symbol)), $want);
        }
        )+
    };
}

component_count_tests!(
    (
        lowered_general_components,
        "% def vD (4), wD (4);\nT_{ij} = v_i w_j",
        "TDD",
        16
    ),
    (
        lowered_symmetric_components,
        "% def sym01 SDD (4), vD (4), wD (4);\nS_{ij} = v_i w_j + v_j w_i",
        "SDD",
        10
    ),
    (
        lowered_antisymmetric_components,
        "% def anti01 FDD (4), vD (4), wD (4);\nF_{ij} = v_i w_j",
        "FDD",
        6
    ),
    (
        declared_symmetric_components,
        "% def sym01 hDD (4)",
        "hDD",
        10
    ),
    (
        symmetric_derivative_components,
        "% def sym01 hDD (3);\nT_{ijk} = h_{ij,k}",
        "hDD_dD",
        18
    ),
);

macro_rules! order_tests {
    ( $( ($name: ident, $source: expr, $want: expr), )+ ) => {
        $(
        #[test]
        fn $name() {
            let document = parse_document($source).unwrap();
            assert_eq!(document.symbols(), $want);
        }
        )+
    };
}

order_tests!(
    (
        redeclared_tensor_precedes_dependents,
        "% def vU (2);\nw^i = v^i;\n% redef vU (2)",
        ["vU", "wU"]
    ),
    (
        dependents_keep_their_relative_order,
        "% def vU (2), uU (2);\nw^i = v^i\ns^i = w^i + u^i\n% redef vU (2)",
        ["uU", "vU", "wU", "sU"]
    ),
    (
        unrelated_names_keep_their_place,
        "% def vU (2), uU (2);\nw^i = v^i\n% redef uU (2)",
        ["vU", "wU", "uU"]
    ),
);

#[test]
fn overflowing_literals_stay_exact() {
    let expr = ricci::parse_expr(r"999999999999 \cdot 999999999999").unwrap();
    assert_eq!(expr.to_string(), "999999999999*999999999999");
}

#[test]
fn oversized_declaration_is_an_error() {
    let err = parse_document("% def TDDDDDDDDDDDDDDDDDDDD (100)").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Directive { .. }));
}

#[test]
fn product_rule_for_partial_derivative() {
    let document = parse_document(
        r"
        % def vU (2), wU (2);
        T^{ab}_c = \partial_c (v^a w^b)
        ",
    )
    .unwrap();
    assert_eq!(
        component(&document, "TUUD", &[0, 1, 1]),
        "vU0*wU_dD11 + vU_dD01*wU1"
    );
}

#[test]
fn scalar_round_trip() {
    let expr = ricci::parse_expr(r"-(\frac{2}{3} + 2\sqrt[5]{x+3})").unwrap();
    assert_eq!(expr.to_string(), "-2*(x + 3)**(1/5) - 2/3");
}

#[test]
fn index_count_law() {
    let n = 4;
    assert_eq!(distinct_components(2, n, &Symmetry::None).len(), n * n);
    assert_eq!(
        distinct_components(2, n, &Symmetry::Symmetric(0, 1)).len(),
        n * (n + 1) / 2
    );
    assert_eq!(
        distinct_components(2, n, &Symmetry::Antisymmetric(0, 1)).len(),
        n * (n - 1) / 2
    );
}

#[test]
fn symmetric_lowering_aliases_components() {
    let document = parse_document(
        r"
        % def sym01 SDD (3), vD (3), wD (3);
        S_{ij} = v_i w_j + v_j w_i
        ",
    )
    .unwrap();
    let s = tensor(&document, "SDD");
    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(s.get(&[i, j]), s.get(&[j, i]));
        }
    }
}

#[test]
fn antisymmetric_lowering_zeroes_diagonal() {
    let document = parse_document(
        r"
        % def anti01 FDD (3), vD (3), wD (3);
        F_{ij} = v_i w_j
        ",
    )
    .unwrap();
    let f = tensor(&document, "FDD");
    for i in 0..3 {
        assert_eq!(f.get(&[i, i]), Some(&Expr::zero()));
        for j in 0..3 {
            assert_eq!(f.get(&[j, i]).cloned(), f.get(&[i, j]).cloned().map(Expr::neg));
        }
    }
}

#[test]
fn covariant_derivative_term_count() {
    for rank in 0..4 {
        let indices: Vec<Index> = (0..rank)
            .map(|i| Index::upper(format!["i{i}"]))
            .collect();
        let expansion = ricci::covdrv::generate(&TensorRef::new("T", indices), &[Index::lower("b")]);
        let terms = match expansion {
            Node::Sum(terms) => terms.len(),
            _ => 1,
        };
        assert_eq!(terms, 1 + rank);
    }
}

#[test]
fn polar_coordinates() {
    let document = parse_document(
        r"
        % coord [r, \theta];
        % def metric gDD (2);
        g_{0 0} = 1; g_{0 1} = 0; g_{1 1} = r^{{2}}
        % redef metric gDD (2)
        % def vU (2);
        T^\mu_\nu = \nabla_\nu v^\mu
        ",
    )
    .unwrap();
    assert_eq!(component(&document, "GammaUDD", &[0, 1, 1]), "-r");
    assert_eq!(component(&document, "GammaUDD", &[1, 0, 1]), "1/r");
    assert_eq!(component(&document, "TUD", &[0, 1]), "-r*vU1 + vU_dD01");
    assert_eq!(component(&document, "TUD", &[0, 0]), "vU_dD00");
}

#[test]
fn covariant_divergence_symbol_order() {
    let document = parse_document(
        r"
        % def metric gDD (3);
        % def anti01 FUU (3), const k;
        J^\mu = (4\pi k)^{-1} \nabla_\nu F^{\mu\nu}
        ",
    )
    .unwrap();
    assert_eq!(
        document.symbols(),
        [
            "gDD", "gUU", "gdet", "FUU", "k", "gDD_dD", "GammaUDD", "FUU_dD", "FUU_cdD", "JU"
        ]
    );
}

#[test]
fn raised_covariant_derivative_contracts_with_inverse_metric() {
    let document = parse_document(
        r"
        % def metric gDD (2), vU (2);
        T^{\mu\nu} = \nabla^\nu v^\mu
        ",
    )
    .unwrap();
    let inverse = tensor(&document, "gUU");
    let derivative = tensor(&document, "vU_cdD");
    let t = tensor(&document, "TUU");
    for mu in 0..2 {
        for nu in 0..2 {
            let want = Expr::add((0..2).map(|a| {
                Expr::mul([
                    inverse.get(&[nu, a]).unwrap().clone(),
                    derivative.get(&[mu, a]).unwrap().clone(),
                ])
            }));
            assert_eq!(t.get(&[mu, nu]), Some(&want));
        }
    }
}

#[test]
fn hat_connection_has_its_own_namespace() {
    let document = parse_document(
        r"
        % def metric ghatDD (2), vU (2);
        T^\mu_\nu = \hat{\nabla}_\nu v^\mu
        ",
    )
    .unwrap();
    assert!(document.get("GammahatUDD").is_some());
    assert!(document.get("vU_cdhatD").is_some());
    assert!(document.get("GammaUDD").is_none());
}

#[test]
fn covariant_derivative_without_metric() {
    let err = parse_document(
        r"
        % def vU (2);
        T^\mu_\nu = \nabla_\nu v^\mu
        ",
    )
    .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::NoConnectionAvailable {
            metric: "gDD".into()
        }
    );
    assert!(err.fragment().is_some());
}

#[test]
fn hat_derivative_needs_hat_metric() {
    let err = parse_document(
        r"
        % def metric gDD (2), vU (2);
        T^\mu_\nu = \hat{\nabla}_\nu v^\mu
        ",
    )
    .unwrap_err();
    assert_eq!(
        err.kind(),
        &ErrorKind::NoConnectionAvailable {
            metric: "ghatDD".into()
        }
    );
}

#[test]
fn repeated_declaration_is_idempotent() {
    let once = parse_document(
        r"
        % def vU (2);
        w^i = 2 v^i
        ",
    )
    .unwrap();
    let twice = parse_document(
        r"
        % def vU (2);
        % def vU (2);
        w^i = 2 v^i
        w^i = 2 v^i
        ",
    )
    .unwrap();
    assert_eq!(once.symbols(), twice.symbols());
    assert_eq!(once.get("wU"), twice.get("wU"));
    assert!(once.warnings().is_empty());
    assert_eq!(twice.warnings().len(), 1);
}

const SCHWARZSCHILD: &str = r"
% coord [t, r, \theta, \phi];
% def const r_s;
% def metric gUU [4], kronecker deltaUU [4];
% parse g^{\mu\nu} = \delta^{\mu\nu};
\begin{align*}
    g^{0 0} &= -\left(1 - \frac{\mathop{r_s}}{r}\right)^{-1} \\
    g^{1 1} &= 1 - \frac{\mathop{r_s}}{r} \\
    g^{2 2} &= r^{{-2}} \\
    g^{3 3} &= \left(r^{{2}} \sin^2(\theta)\right)^{-1}
\end{align*}
% eval gUU;
% redef metric gUU;
";

#[test]
fn metric_redefinition_derives_covariant_metric() {
    let document = parse_document(SCHWARZSCHILD).unwrap();
    assert_eq!(
        document.symbols(),
        ["t", "r", "theta", "phi", "r_s", "deltaUU", "gUU", "gDD", "gdet"]
    );
    let upper = tensor(&document, "gUU");
    let lower = tensor(&document, "gDD");
    for i in 1..4 {
        let product = Expr::mul([
            upper.get(&[i, i]).unwrap().clone(),
            lower.get(&[i, i]).unwrap().clone(),
        ]);
        assert_eq!(product, Expr::one(), "component {i}");
    }
    assert_eq!(component(&document, "gDD", &[0, 1]), "0");
}

#[test]
fn metric_redefinition_is_used_by_covariant_derivatives() {
    let source = format![
        "{SCHWARZSCHILD}\n{}",
        r"
        % def vU [4];
        T^\mu_\nu = \nabla_\nu v^\mu
        "
    ];
    let document = parse_document(&source).unwrap();
    let symbols = document.symbols();
    assert_eq!(
        &symbols[symbols.len() - 5..],
        ["vU", "GammaUDD", "vU_dD", "vU_cdD", "TUD"]
    );
    for (_, expr) in tensor(&document, "GammaUDD").iter() {
        for symbol in expr.symbols() {
            assert!(
                ["r", "r_s", "theta"].contains(&symbol.name()),
                "unexpected symbol {} in the connection",
                symbol.name()
            );
        }
    }
}

#[test]
fn context_keeps_declarations_across_documents() {
    let mut ctx = Context::default();
    ctx.parse("% def vU (2)").unwrap();
    let names = ctx.parse("w^i = v^i").unwrap();
    assert_eq!(names, ["vU", "wU"]);
}

//! Definition-extractor tests over on-disk C++ fixtures.
//!
//! The in-module unit tests cover scoring tiers and single-snippet parsing;
//! this suite exercises the public extractor API the way the engine uses
//! it: multiple candidate files on disk, mixed origins, fuzzy lookups, and
//! the awkward C++ the brace matcher has to survive (braces inside strings
//! and comments, nested types, macro-decorated declarations).

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use unreal_source_query::definitions::{
    match_quality, strip_ue5_prefix, CandidateFile, DefinitionExtractor, DefinitionMatch,
};
use unreal_source_query::error::QueryError;
use unreal_source_query::models::{CancelToken, EntityKind, Origin};

const HIT_RESULT_H: &str = r#"#include "CoreMinimal.h"

/** Result of a single trace against the world. */
USTRUCT(BlueprintType)
struct ENGINE_API FHitResult
{
    GENERATED_USTRUCT_BODY()

    UPROPERTY()
    int32 FaceIndex;

    UPROPERTY()
    float Time;

    UPROPERTY()
    FVector ImpactPoint;

    FHitResult()
    {
        // Reset to "{empty}" sentinel state
        Init();
    }

    void Init()
    {
        Time = 1.f;
    }
};

UENUM(BlueprintType)
enum class ECollisionChannel : uint8
{
    ECC_WorldStatic = 0,
    ECC_WorldDynamic,
    ECC_Pawn UMETA(DisplayName="Pawn"),
    ECC_MAX,
};

DECLARE_DYNAMIC_MULTICAST_DELEGATE_TwoParams(FOnHitRegistered, float, Damage, AActor*, Causer);
"#;

const CHARACTER_H: &str = r#"#include "CoreMinimal.h"

UCLASS(config=Game, BlueprintType)
class ENGINE_API ACharacter : public APawn, public INavAgentInterface
{
    GENERATED_BODY()

public:
    UPROPERTY(Category=Character, VisibleAnywhere, BlueprintReadOnly)
    USkeletalMeshComponent* Mesh;

    UPROPERTY()
    float CrouchedEyeHeight;

    UFUNCTION(BlueprintCallable, Category=Character)
    virtual void Jump();

    virtual bool CanJumpInternal(float DeltaTime) const;
};
"#;

const MOVEMENT_CPP: &str = r#"#include "CharacterMovementComponent.h"

void UCharacterMovementComponent::PhysSlide(float deltaTime, int32 Iterations)
{
    if (deltaTime < MIN_TICK_TIME)
    {
        return;
    }
    const FString DebugTag = TEXT("slide {start}");
    StartNewPhysics(deltaTime, Iterations);
}
"#;

const PROJECT_TYPES_H: &str = r#"#pragma once

struct FHitSummary
{
    int32 TotalHits;
    float AverageDistance;
};

struct FHitResultLite
{
    float Time;
    FVector ImpactPoint;
};
"#;

struct Fixture {
    _dir: TempDir,
    files: Vec<CandidateFile>,
}

fn build_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let sources: [(&str, Origin, &str); 4] = [
        ("HitResult.h", Origin::Engine, HIT_RESULT_H),
        ("Character.h", Origin::Engine, CHARACTER_H),
        ("CharacterMovementComponent.cpp", Origin::Engine, MOVEMENT_CPP),
        ("ProjectTypes.h", Origin::Project, PROJECT_TYPES_H),
    ];

    let mut files = Vec::new();
    for (name, origin, content) in sources {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        files.push(CandidateFile { path, origin });
    }

    Fixture { _dir: dir, files }
}

fn extract(
    fixture: &Fixture,
    name: &str,
    kind: EntityKind,
    fuzzy: bool,
) -> Vec<DefinitionMatch> {
    let extractor = DefinitionExtractor::new(fixture.files.clone());
    extractor
        .extract(name, kind, fuzzy, &CancelToken::new())
        .unwrap()
}

#[test]
fn test_struct_across_files_ranks_exact_first() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "FHitResult", EntityKind::Struct, true);

    // FHitResult exactly, then FHitResultLite via the fuzzy prefix tier;
    // FHitSummary is too far for any tier and must not appear.
    assert!(matches.len() >= 2, "got {} matches", matches.len());
    assert!(matches.iter().all(|m| m.entity_name != "FHitSummary"));
    assert_eq!(matches[0].entity_name, "FHitResult");
    assert_eq!(matches[0].match_quality, 1.0);
    assert_eq!(matches[0].origin, Origin::Engine);
    assert!(matches
        .windows(2)
        .all(|pair| pair[0].match_quality >= pair[1].match_quality));
}

#[test]
fn test_strict_mode_drops_fuzzy_tiers() {
    let fixture = build_fixture();
    let strict = extract(&fixture, "FHitResult", EntityKind::Struct, false);
    assert_eq!(strict.len(), 1);
    assert_eq!(strict[0].entity_name, "FHitResult");
}

#[test]
fn test_block_spans_header_to_closing_brace() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "FHitResult", EntityKind::Struct, false);
    let m = &matches[0];

    assert!(m.line_start < m.line_end);
    assert!(m.definition.starts_with("USTRUCT"));
    assert!(m.definition.trim_end().ends_with('}'));
    // The brace inside the "{empty}" comment and the nested Init() body do
    // not terminate the block early, and the enum after the struct is not
    // swallowed into it.
    assert!(m.definition.contains("void Init()"));
    assert!(!m.definition.contains("ECollisionChannel"));
}

#[test]
fn test_struct_members_and_flags() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "FHitResult", EntityKind::Struct, false);
    let members = &matches[0].members;

    let displays: Vec<String> = members.iter().map(|m| m.display()).collect();
    assert!(displays.contains(&"float Time".to_string()), "{displays:?}");
    assert!(displays.contains(&"FVector ImpactPoint".to_string()));

    let time = members.iter().find(|m| m.name == "Time").unwrap();
    assert!(time.is_uproperty);

    // No duplicates among member names.
    let mut names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    let before = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(before, names.len());
}

#[test]
fn test_class_with_multi_base_inheritance() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "ACharacter", EntityKind::Class, false);

    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.entity_name, "ACharacter");
    assert_eq!(m.kind, EntityKind::Class);

    let jump = m.members.iter().find(|member| member.name == "Jump").unwrap();
    assert!(jump.is_ufunction);
    let mesh = m.members.iter().find(|member| member.name == "Mesh").unwrap();
    assert!(mesh.is_uproperty);
}

#[test]
fn test_enum_variants_skip_umeta_and_values() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "ECollisionChannel", EntityKind::Enum, false);

    assert_eq!(matches.len(), 1);
    let names: Vec<&str> = matches[0].members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["ECC_WorldStatic", "ECC_WorldDynamic", "ECC_Pawn", "ECC_MAX"]
    );
}

#[test]
fn test_out_of_line_function_definition() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "PhysSlide", EntityKind::Function, false);

    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.entity_name, "UCharacterMovementComponent::PhysSlide");
    assert_eq!(m.members.len(), 2);
    // The string literal containing "{start}" does not unbalance the body.
    assert!(m.definition.contains("StartNewPhysics"));
    assert!(m.definition.trim_end().ends_with('}'));
}

#[test]
fn test_function_declaration_in_header() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "CanJumpInternal", EntityKind::Function, false);

    assert_eq!(matches.len(), 1);
    assert!(matches[0].definition.trim_end().ends_with(';'));
    assert_eq!(matches[0].line_start, matches[0].line_end);
}

#[test]
fn test_delegate_declaration() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "FOnHitRegistered", EntityKind::Delegate, false);

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].kind, EntityKind::Delegate);
    assert!(!matches[0].members.is_empty());
}

#[test]
fn test_unknown_kind_fans_out() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "hitresult", EntityKind::Unknown, true);

    assert!(!matches.is_empty());
    assert_eq!(matches[0].entity_name, "FHitResult");
    assert!((0.88..=0.95).contains(&matches[0].match_quality));
}

#[test]
fn test_origin_tagging_follows_candidate_files() {
    let fixture = build_fixture();
    let matches = extract(&fixture, "FHitSummary", EntityKind::Struct, false);

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].origin, Origin::Project);
}

#[test]
fn test_unreadable_candidates_are_skipped() {
    let mut fixture = build_fixture();
    fixture.files.push(CandidateFile {
        path: PathBuf::from("/no/such/file.h"),
        origin: Origin::Engine,
    });

    let matches = extract(&fixture, "FHitResult", EntityKind::Struct, false);
    assert_eq!(matches.len(), 1);
}

#[test]
fn test_cancellation_aborts_scan() {
    let fixture = build_fixture();
    let extractor = DefinitionExtractor::new(fixture.files.clone());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = extractor
        .extract("FHitResult", EntityKind::Struct, true, &cancel)
        .unwrap_err();
    assert!(matches!(err, QueryError::Cancelled));
}

#[test]
fn test_extraction_is_deterministic() {
    let fixture = build_fixture();
    let first = extract(&fixture, "hit", EntityKind::Unknown, true);
    let second = extract(&fixture, "hit", EntityKind::Unknown, true);

    let sites = |matches: &[DefinitionMatch]| -> Vec<(PathBuf, u32)> {
        matches
            .iter()
            .map(|m| (m.file_path.clone(), m.line_start))
            .collect()
    };
    assert_eq!(sites(&first), sites(&second));
}

#[test]
fn test_match_quality_agrees_with_prefix_rules() {
    // Spot checks through the public scoring API, mirroring how the engine
    // ranks expansion targets.
    assert_eq!(strip_ue5_prefix("FHitResult"), "HitResult");
    assert_eq!(strip_ue5_prefix("TArray"), "TArray");

    assert_eq!(match_quality("FHitResult", "FHitResult", true), 1.0);
    assert_eq!(match_quality("hitresult", "FHitResult", true), 0.88);
    assert!(match_quality("FHitRes", "FHitResult", true) > 0.0);
    assert_eq!(match_quality("FHitRes", "FHitResult", false), 0.0);
}
